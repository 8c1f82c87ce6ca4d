//! Data model shared by the coordinator and its collaborators.

pub mod domain;
pub mod pool;
pub mod resource;
pub mod task;

pub use domain::{DomainClass, DomainVersion};
pub use pool::{PoolMetadata, Role, SpmStatus, LVER_INVALID, SPM_ID_FREE};
pub use resource::{
    image_namespace, upgrade_resource, LockMode, ResourceClaim, STORAGE_NAMESPACE,
};
pub use task::{JobSpec, TaskRecord, TaskStatus, SPM_TASK_TAG};
