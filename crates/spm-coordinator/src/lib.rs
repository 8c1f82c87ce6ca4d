//! # SPM Coordinator
//!
//! Elects this host as the storage pool manager (SPM) for a pool and gates
//! every pool-mutating operation behind that role.
//!
//! - [`role`]: pure role transitions (`FREE`, `CONTEND`, `ACQUIRED`)
//! - [`guard`]: operation whitelist and authorization
//! - [`lver`]: election epoch bookkeeping
//! - [`upgrade`]: master-first domain upgrade campaigns
//! - [`tasks`]: persisted, crash-recoverable task scheduling
//! - [`mailbox`]: extension requests from non-SPM hosts
//! - [`teardown`]: per-step release accounting
//! - [`coordinator`]: the per-pool coordinator composing the above
//! - [`service`]: the per-host map of pool coordinators
//!
//! All collaborators are injected through [`spm_core::SpmContext`].

pub mod coordinator;
pub mod guard;
pub mod lver;
pub mod mailbox;
pub mod role;
pub mod service;
pub mod tasks;
pub mod teardown;
pub mod upgrade;

pub use coordinator::{SpmCoordinator, StartRequest, DEFAULT_MAX_HOST_ID};
pub use guard::{Access, RoleGuard, SpmOperation};
pub use lver::{Epoch, VersionCounter};
pub use mailbox::{ExtendRequest, MailboxMonitor};
pub use role::{transition, RoleTransitionError};
pub use service::SpmService;
pub use tasks::{RecoverySummary, TaskScheduler, TaskStore};
pub use teardown::{TeardownReport, TeardownStep};
pub use upgrade::{MasterDomainUpgrader, UpgradeStarted, UpgradeStatus};
