//! Process termination on unrecoverable release failures.

/// Called when releasing the SPM role leaves a critical invariant broken
/// (lease still held, master still mounted).
///
/// Production handlers do not return. Test handlers record the call and
/// return, after which the coordinator reports [`crate::SpmError::Fatal`].
pub trait Terminator: Send + Sync {
    /// Terminate the process
    fn terminate(&self, reason: &str);
}

/// Logs the reason and aborts the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessAbort;

impl Terminator for ProcessAbort {
    fn terminate(&self, reason: &str) {
        tracing::error!(reason, "Unrecoverable SPM release failure, aborting process");
        std::process::abort();
    }
}
