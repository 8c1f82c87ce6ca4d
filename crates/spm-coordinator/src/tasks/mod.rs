//! Crash-recoverable task scheduling.

mod scheduler;
mod store;

pub use scheduler::{RecoverySummary, TaskScheduler};
pub use store::{TaskStore, TASK_FILE_EXTENSION};

use spm_core::effects::{JobRunner, ResourceManager};
use spm_core::{JobSpec, StorageError};

/// Run a job while holding every resource it declares.
///
/// Locks are taken in the job's canonical order and released when the job
/// returns.
pub fn run_job_locked(
    resources: &dyn ResourceManager,
    runner: &dyn JobRunner,
    job: &JobSpec,
) -> Result<(), StorageError> {
    let _guards = resources.acquire_all(&job.resources())?;
    runner.run(job)
}
