//! Role-based authorization for the coordinator's public surface
//!
//! Every public operation is named by an [`SpmOperation`]. A small whitelist
//! may run in any role; everything else requires [`Role::Acquired`] at call
//! time.

use spm_core::{PoolId, Role, SpmError, SpmResult};
use tracing::debug;

/// Whether an operation needs the SPM role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Runs in any role
    Whitelisted,
    /// Requires `Role::Acquired`
    Guarded,
}

/// Operations exposed by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SpmOperation {
    Start,
    GetStatus,
    Fence,
    Stop,
    CleanupMasterMount,
    UpgradePool,
    UpgradeStatus,
    Schedule,
    TaskStatus,
    ListTasks,
    AbortTask,
    ClearTask,
    CreateVolume,
    DeleteVolume,
    CopyImage,
    MoveImage,
    MergeSnapshots,
    ExtendVolume,
    AttachDomain,
    DetachDomain,
    ActivateDomain,
    DeactivateDomain,
}

impl SpmOperation {
    /// All operations, for exhaustive checks
    pub const ALL: [SpmOperation; 22] = [
        SpmOperation::Start,
        SpmOperation::GetStatus,
        SpmOperation::Fence,
        SpmOperation::Stop,
        SpmOperation::CleanupMasterMount,
        SpmOperation::UpgradePool,
        SpmOperation::UpgradeStatus,
        SpmOperation::Schedule,
        SpmOperation::TaskStatus,
        SpmOperation::ListTasks,
        SpmOperation::AbortTask,
        SpmOperation::ClearTask,
        SpmOperation::CreateVolume,
        SpmOperation::DeleteVolume,
        SpmOperation::CopyImage,
        SpmOperation::MoveImage,
        SpmOperation::MergeSnapshots,
        SpmOperation::ExtendVolume,
        SpmOperation::AttachDomain,
        SpmOperation::DetachDomain,
        SpmOperation::ActivateDomain,
        SpmOperation::DeactivateDomain,
    ];

    /// Access level of the operation
    pub const fn access(self) -> Access {
        match self {
            SpmOperation::Start
            | SpmOperation::GetStatus
            | SpmOperation::Fence
            | SpmOperation::Stop
            | SpmOperation::CleanupMasterMount => Access::Whitelisted,
            _ => Access::Guarded,
        }
    }

    /// Wire name of the operation
    pub const fn name(self) -> &'static str {
        match self {
            SpmOperation::Start => "spmStart",
            SpmOperation::GetStatus => "getSpmStatus",
            SpmOperation::Fence => "fenceSpmStorage",
            SpmOperation::Stop => "spmStop",
            SpmOperation::CleanupMasterMount => "cleanupMasterMount",
            SpmOperation::UpgradePool => "upgradeStoragePool",
            SpmOperation::UpgradeStatus => "getUpgradeStatus",
            SpmOperation::Schedule => "schedule",
            SpmOperation::TaskStatus => "getTaskStatus",
            SpmOperation::ListTasks => "getAllTasks",
            SpmOperation::AbortTask => "stopTask",
            SpmOperation::ClearTask => "clearTask",
            SpmOperation::CreateVolume => "createVolume",
            SpmOperation::DeleteVolume => "deleteVolume",
            SpmOperation::CopyImage => "copyImage",
            SpmOperation::MoveImage => "moveImage",
            SpmOperation::MergeSnapshots => "mergeSnapshots",
            SpmOperation::ExtendVolume => "extendVolume",
            SpmOperation::AttachDomain => "attachStorageDomain",
            SpmOperation::DetachDomain => "detachStorageDomain",
            SpmOperation::ActivateDomain => "activateStorageDomain",
            SpmOperation::DeactivateDomain => "deactivateStorageDomain",
        }
    }
}

/// Authorization predicate over the current role
pub struct RoleGuard;

impl RoleGuard {
    /// Allow `operation` in `role`, or return [`SpmError::Authorization`]
    pub fn authorize(pool: PoolId, operation: SpmOperation, role: Role) -> SpmResult<()> {
        match operation.access() {
            Access::Whitelisted => Ok(()),
            Access::Guarded if role.is_acquired() => Ok(()),
            Access::Guarded => {
                debug!(
                    pool = %pool,
                    operation = operation.name(),
                    role = %role,
                    "Rejected operation outside SPM role"
                );
                Err(SpmError::authorization(pool, operation.name(), role))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_guarded_operations_need_acquired_role() {
        let pool = PoolId::new();
        for op in SpmOperation::ALL {
            for role in [Role::Free, Role::Contend] {
                let result = RoleGuard::authorize(pool, op, role);
                match op.access() {
                    Access::Whitelisted => assert!(result.is_ok()),
                    Access::Guarded => assert_matches!(
                        result,
                        Err(SpmError::Authorization { operation, .. }) if operation == op.name()
                    ),
                }
            }
            assert!(RoleGuard::authorize(pool, op, Role::Acquired).is_ok());
        }
    }

    #[test]
    fn test_whitelist() {
        let whitelisted: Vec<_> = SpmOperation::ALL
            .into_iter()
            .filter(|op| op.access() == Access::Whitelisted)
            .collect();
        assert_eq!(
            whitelisted,
            vec![
                SpmOperation::Start,
                SpmOperation::GetStatus,
                SpmOperation::Fence,
                SpmOperation::Stop,
                SpmOperation::CleanupMasterMount,
            ]
        );
    }
}
