//! Terminator that records instead of aborting.

use parking_lot::Mutex;

use spm_core::effects::Terminator;

/// Records termination reasons
#[derive(Default)]
pub struct RecordingTerminator {
    reasons: Mutex<Vec<String>>,
}

impl RecordingTerminator {
    /// Nothing recorded yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Reasons passed to `terminate`
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }

    /// Whether `terminate` was called
    pub fn terminated(&self) -> bool {
        !self.reasons.lock().is_empty()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, reason: &str) {
        self.reasons.lock().push(reason.to_string());
    }
}
