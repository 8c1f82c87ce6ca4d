//! Step-by-step release accounting.
//!
//! Releasing the SPM role runs a fixed sequence of steps. Every step is
//! attempted even if an earlier one failed; the outcomes are collected in a
//! [`TeardownReport`] and checked once at the end.

use std::fmt;

use spm_core::effects::Terminator;
use spm_core::{PoolId, SpmError, SpmResult};
use tracing::{error, warn};

/// Named release steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownStep {
    /// Stop the upgrade campaign
    ShutdownUpgrade,
    /// Stop the mailbox monitor
    StopMailbox,
    /// Unload tasks from the scheduler
    UnloadTasks,
    /// Unmount the master domain
    UnmountMaster,
    /// Write fenced pool metadata over an interrupted election's stamp
    ResetMetadata,
    /// Release the pool lease
    ReleaseClusterLock,
}

impl TeardownStep {
    /// Whether a failure leaves a cluster-wide invariant broken
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            TeardownStep::UnmountMaster | TeardownStep::ReleaseClusterLock
        )
    }

    /// Step name used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            TeardownStep::ShutdownUpgrade => "shutdown_upgrade",
            TeardownStep::StopMailbox => "stop_mailbox",
            TeardownStep::UnloadTasks => "unload_tasks",
            TeardownStep::UnmountMaster => "unmount_master",
            TeardownStep::ResetMetadata => "reset_metadata",
            TeardownStep::ReleaseClusterLock => "release_cluster_lock",
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one attempted step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Step that ran
    pub step: TeardownStep,
    /// Failure message, `None` on success
    pub error: Option<String>,
}

/// Outcomes of a release, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pool: PoolId,
    outcomes: Vec<StepOutcome>,
}

impl TeardownReport {
    /// Empty report for `pool`
    pub fn new(pool: PoolId) -> Self {
        Self {
            pool,
            outcomes: Vec::new(),
        }
    }

    /// Record the result of a step
    pub fn record<E: fmt::Display>(&mut self, step: TeardownStep, result: Result<(), E>) {
        let error = result.err().map(|e| e.to_string());
        if let Some(message) = &error {
            warn!(pool = %self.pool, step = %step, error = %message, "Release step failed");
        }
        self.outcomes.push(StepOutcome { step, error });
    }

    /// All recorded outcomes
    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    /// Steps that failed
    pub fn failed_steps(&self) -> Vec<TeardownStep> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.step)
            .collect()
    }

    /// Whether every step succeeded
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    /// Turn the report into the release result.
    ///
    /// A failed critical step calls the terminator and yields
    /// [`SpmError::Fatal`] if it returns; other failures yield
    /// [`SpmError::Degraded`].
    pub fn into_result(self, terminator: &dyn Terminator) -> SpmResult<()> {
        let critical: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| o.step.is_critical())
            .filter_map(|o| o.error.as_ref().map(|e| format!("{}: {e}", o.step)))
            .collect();
        if !critical.is_empty() {
            let message = critical.join("; ");
            error!(pool = %self.pool, failures = %message, "Critical release failure");
            terminator.terminate(&message);
            return Err(SpmError::Fatal {
                pool: self.pool,
                message,
            });
        }

        let failed = self.failed_steps();
        if failed.is_empty() {
            return Ok(());
        }
        Err(SpmError::Degraded {
            pool: self.pool,
            failed_steps: failed.iter().map(|s| s.name().to_string()).collect(),
        })
    }
}
