//! Collaborator traits
//!
//! The coordinator never touches storage, leases or the process directly.
//! Everything outside its own state machine is reached through the traits in
//! this module, which are injected at construction time. Production handlers
//! live with the storage layer; in-memory handlers live in `spm-testkit`.

pub mod cluster_lock;
pub mod connectivity;
pub mod domain;
pub mod jobs;
pub mod mailbox;
pub mod pool;
pub mod resource;
pub mod terminate;

pub use cluster_lock::ClusterLock;
pub use connectivity::{ConnectivityCallback, ConnectivityMonitor, SubscriptionId};
pub use domain::{DomainHandle, DomainRegistry};
pub use jobs::JobRunner;
pub use mailbox::{MailboxMessageBytes, MailboxStore, MAILBOX_MESSAGE_SIZE};
pub use pool::{PoolHandle, PoolRegistry};
pub use resource::{ResourceGuard, ResourceManager};
pub use terminate::{ProcessAbort, Terminator};
