//! Unified error system for the storage pool manager
//!
//! One error enum covers the coordinator's own failure modes. Errors raised by
//! storage collaborators travel through [`SpmError::Storage`] unchanged.

use crate::identifiers::{DomainId, PoolId, TaskId};
use crate::types::{DomainVersion, Role};
use serde::{Deserialize, Serialize};

/// Error reported by an external storage collaborator.
///
/// The coordinator never interprets these beyond logging; they are passed
/// back to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StorageError {
    /// The named object does not exist
    #[error("Storage object not found: {message}")]
    NotFound {
        /// What was looked up
        message: String,
    },

    /// The cluster lock could not be obtained or released
    #[error("Cluster lock error: {message}")]
    Lock {
        /// Lock failure detail
        message: String,
    },

    /// I/O against shared storage failed
    #[error("Storage I/O error: {message}")]
    Io {
        /// I/O failure detail
        message: String,
    },

    /// Any other collaborator failure
    #[error("Storage operation failed: {message}")]
    Failed {
        /// Failure detail
        message: String,
    },
}

impl StorageError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a cluster lock error
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::io(err.to_string()),
        }
    }
}

/// Unified error type for all SPM operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpmError {
    /// Operation requires the SPM role and this host does not hold it
    #[error("Not authorized: {operation} on pool {pool} requires SPM role (current role {role})")]
    Authorization {
        /// Pool the operation targeted
        pool: PoolId,
        /// Operation that was rejected
        operation: &'static str,
        /// Role observed at call time
        role: Role,
    },

    /// Another `start` is already contending for the pool
    #[error("SPM acquisition already in progress for pool {pool}")]
    ConcurrentAcquisition {
        /// Pool being acquired
        pool: PoolId,
    },

    /// An upgrade campaign is already running for the pool
    #[error("Upgrade campaign already in progress for pool {pool}")]
    UpgradeInProgress {
        /// Pool being upgraded
        pool: PoolId,
    },

    /// A domain is already at a version above the requested target
    #[error("Domain {domain} current version {current} is more advanced than requested {requested}")]
    VersionTooAdvanced {
        /// Domain whose version blocked the request
        domain: DomainId,
        /// Version the domain is at
        current: DomainVersion,
        /// Version that was requested
        requested: DomainVersion,
    },

    /// Requested domain version is not in the supported set
    #[error("Unsupported domain version {version}")]
    UnsupportedVersion {
        /// Requested version
        version: DomainVersion,
    },

    /// Release is blocked by tasks that have not reached a terminal state
    #[error("Pool {pool} has {} task(s) still in progress", .tasks.len())]
    TaskInProgress {
        /// Pool being released
        pool: PoolId,
        /// Outstanding tasks
        tasks: Vec<TaskId>,
    },

    /// Task id is not known to the scheduler
    #[error("Unknown task {task}")]
    UnknownTask {
        /// Task that was looked up
        task: TaskId,
    },

    /// Task must be terminal for the requested operation
    #[error("Task {task} has not finished")]
    TaskNotFinished {
        /// Task that is still pending or running
        task: TaskId,
    },

    /// A fence reset the role while `start` was contending
    #[error("SPM acquisition for pool {pool} was interrupted by a fence")]
    AcquisitionInterrupted {
        /// Pool being acquired
        pool: PoolId,
    },

    /// Release finished but some non-critical steps failed
    #[error("Release of pool {pool} degraded, failed steps: {}", .failed_steps.join(", "))]
    Degraded {
        /// Pool being released
        pool: PoolId,
        /// Names of the steps that failed
        failed_steps: Vec<String>,
    },

    /// Release left a critical invariant broken
    #[error("Fatal release failure for pool {pool}: {message}")]
    Fatal {
        /// Pool being released
        pool: PoolId,
        /// Failure summary
        message: String,
    },

    /// The role state machine refused a transition
    #[error("Invalid SPM role transition {from} -> {to}")]
    InvalidRoleTransition {
        /// Role before the attempted change
        from: Role,
        /// Requested role
        to: Role,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration problem
        message: String,
    },

    /// Task records could not be read or written
    #[error("Task persistence error: {message}")]
    Persistence {
        /// Error message describing the persistence failure
        message: String,
    },

    /// Pass-through error from a storage collaborator
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SpmError {
    /// Create an authorization error
    pub fn authorization(pool: PoolId, operation: &'static str, role: Role) -> Self {
        Self::Authorization {
            pool,
            operation,
            role,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Whether this error is a guard rejection
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}

impl From<serde_json::Error> for SpmError {
    fn from(err: serde_json::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

/// Standard Result type for SPM operations
pub type SpmResult<T> = std::result::Result<T, SpmError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_storage_error_passes_through() {
        let err: SpmError = StorageError::lock("lease held by host 2").into();
        assert_matches!(err, SpmError::Storage(StorageError::Lock { .. }));
        assert_eq!(err.to_string(), "Cluster lock error: lease held by host 2");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such mount");
        assert_matches!(StorageError::from(io_err), StorageError::NotFound { .. });
    }

    #[test]
    fn test_task_in_progress_message() {
        let err = SpmError::TaskInProgress {
            pool: PoolId::from_uuid(uuid::Uuid::nil()),
            tasks: vec![TaskId::new(), TaskId::new()],
        };
        assert!(err.to_string().contains("2 task(s)"));
    }

    #[test]
    fn test_degraded_lists_steps() {
        let err = SpmError::Degraded {
            pool: PoolId::from_uuid(uuid::Uuid::nil()),
            failed_steps: vec!["stop_mailbox".into(), "unload_tasks".into()],
        };
        assert!(err.to_string().ends_with("stop_mailbox, unload_tasks"));
    }

    #[test]
    fn test_authorization_helper() {
        let err = SpmError::authorization(PoolId::new(), "create_volume", Role::Free);
        assert!(err.is_authorization());
    }
}
