//! # SPM Core
//!
//! Shared foundation for the storage pool manager (SPM):
//!
//! - identifiers for pools, domains, images, volumes, tasks and hosts
//! - the data model (role, pool metadata, task records, jobs, resources)
//! - the unified [`SpmError`] type
//! - [`SpmConfig`] loading and validation
//! - collaborator traits in [`effects`], implemented by the storage layer
//!   in production and by `spm-testkit` in tests
//!
//! This crate performs no I/O of its own beyond reading configuration files.

pub mod config;
pub mod context;
pub mod effects;
pub mod errors;
pub mod identifiers;
pub mod types;

pub use config::{MailboxConfig, SpmConfig, UpgradeConfig};
pub use context::SpmContext;
pub use errors::{SpmError, SpmResult, StorageError};
pub use identifiers::{DomainId, HostId, ImageId, PoolId, TaskId, VolumeId};
pub use types::{
    DomainClass, DomainVersion, JobSpec, LockMode, PoolMetadata, ResourceClaim, Role, SpmStatus,
    TaskRecord, TaskStatus,
};
