//! Storage pool access.

use std::path::PathBuf;
use std::sync::Arc;

use crate::effects::mailbox::MailboxStore;
use crate::errors::StorageError;
use crate::identifiers::{DomainId, PoolId};
use crate::types::PoolMetadata;

/// A storage pool as seen from this host.
pub trait PoolHandle: Send + Sync {
    /// Pool identifier
    fn id(&self) -> PoolId;

    /// Read `lver` and `spmId` from pool metadata
    fn read_metadata(&self) -> Result<PoolMetadata, StorageError>;

    /// Write `lver` and `spmId`; callers hold the pool resource exclusively
    fn write_spm_status(&self, metadata: PoolMetadata) -> Result<(), StorageError>;

    /// Drop any cached metadata so the next read goes to storage
    fn invalidate_metadata(&self);

    /// Domain designated as master
    fn master_domain(&self) -> DomainId;

    /// Active member domains, master included
    fn active_domains(&self) -> Result<Vec<DomainId>, StorageError>;

    /// Mount the master domain's filesystem
    fn mount_master(&self) -> Result<(), StorageError>;

    /// Recreate the pool's link structure
    fn prepare_links(&self) -> Result<(), StorageError>;

    /// Unmount the master domain's filesystem
    fn unmount_master(&self) -> Result<(), StorageError>;

    /// Directory holding persisted task records
    fn tasks_dir(&self) -> PathBuf;

    /// Whether the pool lives on block storage
    fn is_block_backed(&self) -> bool;

    /// Mailbox area, present only for block-backed pools
    fn mailbox(&self) -> Option<Arc<dyn MailboxStore>>;
}

/// Resolves pool ids to handles.
pub trait PoolRegistry: Send + Sync {
    /// Get the handle for a pool
    fn get_pool(&self, pool: PoolId) -> Result<Arc<dyn PoolHandle>, StorageError>;
}
