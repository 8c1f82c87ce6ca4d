//! Job runner that records what it was asked to do.

use parking_lot::Mutex;
use std::collections::HashSet;

use spm_core::effects::JobRunner;
use spm_core::{JobSpec, StorageError};

use crate::sync::Gate;

/// Records jobs; can be paused with a gate and told to fail by kind.
#[derive(Default)]
pub struct RecordingJobRunner {
    started: Mutex<Vec<JobSpec>>,
    completed: Mutex<Vec<JobSpec>>,
    failing: Mutex<HashSet<&'static str>>,
    gate: Gate,
}

impl RecordingJobRunner {
    /// Runner that completes every job immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate passed by every job after it is recorded as started
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Fail jobs of `kind` (see [`JobSpec::kind`])
    pub fn fail_kind(&self, kind: &'static str) {
        self.failing.lock().insert(kind);
    }

    /// Jobs that entered `run`
    pub fn started(&self) -> Vec<JobSpec> {
        self.started.lock().clone()
    }

    /// Jobs that returned from `run`, successful or not
    pub fn completed(&self) -> Vec<JobSpec> {
        self.completed.lock().clone()
    }
}

impl JobRunner for RecordingJobRunner {
    fn run(&self, job: &JobSpec) -> Result<(), StorageError> {
        self.started.lock().push(job.clone());
        self.gate.pass();
        let fail = self.failing.lock().contains(job.kind());
        self.completed.lock().push(job.clone());
        if fail {
            Err(StorageError::failed(format!("{} failed", job.kind())))
        } else {
            Ok(())
        }
    }
}
