//! SPM Testing Infrastructure
//!
//! In-memory implementations of every collaborator trait in
//! `spm_core::effects`, plus a harness that wires them to one pool.
//!
//! ```rust,no_run
//! use spm_testkit::SpmTestHarness;
//!
//! let harness = SpmTestHarness::builder().data_domain(3, true).build();
//! let spm = harness.coordinator();
//! spm.start(&harness.start_request()).unwrap();
//! assert_eq!(spm.lver(), 1);
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod cluster_lock;
pub mod connectivity;
pub mod domain;
pub mod harness;
pub mod jobs;
pub mod mailbox;
pub mod pool;
pub mod resources;
pub mod sync;
pub mod terminator;

pub use cluster_lock::MemoryClusterLock;
pub use connectivity::ManualConnectivityMonitor;
pub use domain::{MemoryDomain, MemoryDomainRegistry, UpgradeEvent, UpgradeLog};
pub use harness::{
    init_tracing, SpmTestHarness, SpmTestHarnessBuilder, TEST_MAX_HOST_ID, TEST_POLL_INTERVAL_MS,
    TEST_TIMEOUT,
};
pub use jobs::RecordingJobRunner;
pub use mailbox::MemoryMailbox;
pub use pool::{MemoryPool, MemoryPoolRegistry};
pub use resources::LocalResourceManager;
pub use sync::{wait_until, Gate};
pub use terminator::RecordingTerminator;
