//! Task records and the jobs they carry.
//!
//! A [`TaskRecord`] is the unit the scheduler persists: it must contain
//! everything needed to re-run the job after a crash, so jobs are plain data
//! ([`JobSpec`]) rather than closures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::identifiers::{DomainId, ImageId, PoolId, TaskId, VolumeId};
use crate::types::resource::{LockMode, ResourceClaim};

/// Default tag given to tasks scheduled by the SPM
pub const SPM_TASK_TAG: &str = "spm";

/// Task lifecycle: `Pending -> Running -> {Done | Failed}`, or
/// `Pending -> Aborted` when aborted before a worker picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Registered and persisted, waiting for a worker
    Pending,
    /// Executing on a worker
    Running,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
    /// Aborted before execution
    Aborted,
}

impl TaskStatus {
    /// Whether the task will make no further progress
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Aborted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Done => write!(f, "DONE"),
            TaskStatus::Failed => write!(f, "FAILED"),
            TaskStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A mutating pool operation and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JobSpec {
    /// Create a volume, optionally as a snapshot of `parent`
    CreateVolume {
        /// Target domain
        domain: DomainId,
        /// Image the volume belongs to
        image: ImageId,
        /// New volume id
        volume: VolumeId,
        /// Virtual size in bytes
        size: u64,
        /// Parent volume for snapshots
        parent: Option<VolumeId>,
        /// Free-form description
        description: String,
    },
    /// Delete volumes of an image
    DeleteVolume {
        /// Domain holding the image
        domain: DomainId,
        /// Image the volumes belong to
        image: ImageId,
        /// Volumes to delete
        volumes: Vec<VolumeId>,
        /// Zero the data before freeing it
        post_zero: bool,
    },
    /// Copy one volume chain into a new image
    CopyImage {
        /// Source domain
        src_domain: DomainId,
        /// Source image
        src_image: ImageId,
        /// Source leaf volume
        src_volume: VolumeId,
        /// Destination domain
        dst_domain: DomainId,
        /// Destination image
        dst_image: ImageId,
        /// Destination volume
        dst_volume: VolumeId,
    },
    /// Move (or copy, when `keep_source`) an image between domains
    MoveImage {
        /// Source domain
        src_domain: DomainId,
        /// Destination domain
        dst_domain: DomainId,
        /// Image to move
        image: ImageId,
        /// Leave the source image in place
        keep_source: bool,
    },
    /// Merge snapshots between `ancestor` and `successor`
    MergeSnapshots {
        /// Domain holding the image
        domain: DomainId,
        /// Image holding the chain
        image: ImageId,
        /// Oldest volume of the merge range
        ancestor: VolumeId,
        /// Newest volume of the merge range
        successor: VolumeId,
    },
    /// Grow a volume to `new_size` bytes
    ExtendVolume {
        /// Domain holding the volume
        domain: DomainId,
        /// Image holding the volume
        image: ImageId,
        /// Volume to extend
        volume: VolumeId,
        /// New size in bytes
        new_size: u64,
    },
    /// Attach a domain to the pool
    AttachDomain {
        /// Pool gaining the domain
        pool: PoolId,
        /// Domain being attached
        domain: DomainId,
    },
    /// Detach a domain from the pool
    DetachDomain {
        /// Pool losing the domain
        pool: PoolId,
        /// Domain being detached
        domain: DomainId,
    },
    /// Activate an attached domain
    ActivateDomain {
        /// Pool owning the domain
        pool: PoolId,
        /// Domain being activated
        domain: DomainId,
    },
    /// Deactivate an active domain
    DeactivateDomain {
        /// Pool owning the domain
        pool: PoolId,
        /// Domain being deactivated
        domain: DomainId,
    },
}

impl JobSpec {
    /// Operation name used in logs and as the default task name
    pub fn kind(&self) -> &'static str {
        match self {
            JobSpec::CreateVolume { .. } => "create_volume",
            JobSpec::DeleteVolume { .. } => "delete_volume",
            JobSpec::CopyImage { .. } => "copy_image",
            JobSpec::MoveImage { .. } => "move_image",
            JobSpec::MergeSnapshots { .. } => "merge_snapshots",
            JobSpec::ExtendVolume { .. } => "extend_volume",
            JobSpec::AttachDomain { .. } => "attach_domain",
            JobSpec::DetachDomain { .. } => "detach_domain",
            JobSpec::ActivateDomain { .. } => "activate_domain",
            JobSpec::DeactivateDomain { .. } => "deactivate_domain",
        }
    }

    /// Resource locks the job holds while running.
    ///
    /// Claims on the same resource are merged to the strongest mode and the
    /// result is sorted, so every job acquires in the same global order.
    pub fn resources(&self) -> Vec<ResourceClaim> {
        let claims = match self {
            JobSpec::CreateVolume { domain, image, .. }
            | JobSpec::DeleteVolume { domain, image, .. }
            | JobSpec::MergeSnapshots { domain, image, .. }
            | JobSpec::ExtendVolume { domain, image, .. } => vec![
                ResourceClaim::domain(*domain, LockMode::Shared),
                ResourceClaim::image(*domain, *image, LockMode::Exclusive),
            ],
            JobSpec::CopyImage {
                src_domain,
                src_image,
                dst_domain,
                dst_image,
                ..
            } => vec![
                ResourceClaim::domain(*src_domain, LockMode::Shared),
                ResourceClaim::image(*src_domain, *src_image, LockMode::Shared),
                ResourceClaim::domain(*dst_domain, LockMode::Shared),
                ResourceClaim::image(*dst_domain, *dst_image, LockMode::Exclusive),
            ],
            JobSpec::MoveImage {
                src_domain,
                dst_domain,
                image,
                ..
            } => vec![
                ResourceClaim::domain(*src_domain, LockMode::Shared),
                ResourceClaim::image(*src_domain, *image, LockMode::Exclusive),
                ResourceClaim::domain(*dst_domain, LockMode::Shared),
                ResourceClaim::image(*dst_domain, *image, LockMode::Exclusive),
            ],
            JobSpec::AttachDomain { pool, domain }
            | JobSpec::DetachDomain { pool, domain }
            | JobSpec::ActivateDomain { pool, domain }
            | JobSpec::DeactivateDomain { pool, domain } => vec![
                ResourceClaim::pool(*pool, LockMode::Exclusive),
                ResourceClaim::domain(*domain, LockMode::Exclusive),
            ],
        };

        let mut merged: BTreeMap<(String, String), LockMode> = BTreeMap::new();
        for claim in claims {
            let mode = merged
                .entry((claim.namespace, claim.name))
                .or_insert(claim.mode);
            if claim.mode == LockMode::Exclusive {
                *mode = LockMode::Exclusive;
            }
        }
        merged
            .into_iter()
            .map(|((namespace, name), mode)| ResourceClaim {
                namespace,
                name,
                mode,
            })
            .collect()
    }
}

/// Persisted representation of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identifier
    pub id: TaskId,
    /// Human-readable name
    pub name: String,
    /// Pool the task mutates
    pub pool: PoolId,
    /// Tag for bulk queries (e.g. "spm")
    pub tag: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Job to execute
    pub job: JobSpec,
    /// Election epoch the task was scheduled in
    pub lver: i64,
    /// Failure message for FAILED tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    /// Create a new pending record
    pub fn new(
        name: impl Into<String>,
        tag: impl Into<String>,
        pool: PoolId,
        lver: i64,
        job: JobSpec,
    ) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            pool,
            tag: tag.into(),
            status: TaskStatus::Pending,
            job,
            lver,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_copy_within_one_image_merges_to_exclusive() {
        let domain = DomainId::new();
        let image = ImageId::new();
        let job = JobSpec::CopyImage {
            src_domain: domain,
            src_image: image,
            src_volume: VolumeId::new(),
            dst_domain: domain,
            dst_image: image,
            dst_volume: VolumeId::new(),
        };

        let claims = job.resources();
        assert_eq!(claims.len(), 2);
        let image_claim = claims
            .iter()
            .find(|c| c.name == image.to_string())
            .unwrap();
        assert_eq!(image_claim.mode, LockMode::Exclusive);
    }

    #[test]
    fn test_resources_are_sorted() {
        let job = JobSpec::MoveImage {
            src_domain: DomainId::new(),
            dst_domain: DomainId::new(),
            image: ImageId::new(),
            keep_source: false,
        };
        let claims = job.resources();
        let keys: Vec<_> = claims
            .iter()
            .map(|c| (c.namespace.clone(), c.name.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_record_json_is_tagged_by_operation() {
        let record = TaskRecord::new(
            "extend",
            SPM_TASK_TAG,
            PoolId::new(),
            3,
            JobSpec::ExtendVolume {
                domain: DomainId::new(),
                image: ImageId::new(),
                volume: VolumeId::new(),
                new_size: 1 << 30,
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["job"]["op"], "extend_volume");
        assert_eq!(json["status"], "PENDING");
        assert!(json.get("error").is_none());
    }
}
