//! Execution of pool-mutating jobs.

use crate::errors::StorageError;
use crate::types::JobSpec;

/// Performs the storage work behind a [`JobSpec`].
///
/// Callers hold the job's resource locks for the duration of `run`.
pub trait JobRunner: Send + Sync {
    /// Execute the job to completion
    fn run(&self, job: &JobSpec) -> Result<(), StorageError>;
}
