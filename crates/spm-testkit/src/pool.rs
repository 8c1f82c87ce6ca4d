//! In-memory pools.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use spm_core::effects::{MailboxStore, PoolHandle, PoolRegistry};
use spm_core::{DomainId, PoolId, PoolMetadata, StorageError};

use crate::mailbox::MemoryMailbox;

/// Pool whose metadata and mount state live in memory.
///
/// Task records go to a real directory so persistence is exercised.
pub struct MemoryPool {
    id: PoolId,
    master: DomainId,
    domains: Mutex<Vec<DomainId>>,
    metadata: Mutex<PoolMetadata>,
    tasks_dir: PathBuf,
    mailbox: Option<Arc<MemoryMailbox>>,
    mounted: AtomicBool,
    mounts: AtomicUsize,
    link_preparations: AtomicUsize,
    invalidations: AtomicUsize,
    fail_mount: AtomicBool,
    fail_unmount: AtomicBool,
}

impl MemoryPool {
    /// Unclaimed pool with `master` as its only domain
    pub fn new(id: PoolId, master: DomainId, tasks_dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            master,
            domains: Mutex::new(vec![master]),
            metadata: Mutex::new(PoolMetadata::unclaimed()),
            tasks_dir: tasks_dir.into(),
            mailbox: None,
            mounted: AtomicBool::new(false),
            mounts: AtomicUsize::new(0),
            link_preparations: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            fail_mount: AtomicBool::new(false),
            fail_unmount: AtomicBool::new(false),
        }
    }

    /// Make the pool block-backed with the given mailbox
    pub fn with_mailbox(mut self, mailbox: Arc<MemoryMailbox>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    /// Add an active member domain
    pub fn add_domain(&self, domain: DomainId) {
        self.domains.lock().push(domain);
    }

    /// Overwrite pool metadata
    pub fn set_metadata(&self, metadata: PoolMetadata) {
        *self.metadata.lock() = metadata;
    }

    /// Current pool metadata
    pub fn metadata(&self) -> PoolMetadata {
        *self.metadata.lock()
    }

    /// Whether the master domain is mounted
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Mark the master as mounted without counting a mount
    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::SeqCst);
    }

    /// Number of successful mounts
    pub fn mount_count(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    /// Number of link structure preparations
    pub fn link_preparations(&self) -> usize {
        self.link_preparations.load(Ordering::SeqCst)
    }

    /// Number of metadata cache invalidations
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Make `mount_master` fail while set
    pub fn set_fail_mount(&self, fail: bool) {
        self.fail_mount.store(fail, Ordering::SeqCst);
    }

    /// Make `unmount_master` fail while set
    pub fn set_fail_unmount(&self, fail: bool) {
        self.fail_unmount.store(fail, Ordering::SeqCst);
    }
}

impl PoolHandle for MemoryPool {
    fn id(&self) -> PoolId {
        self.id
    }

    fn read_metadata(&self) -> Result<PoolMetadata, StorageError> {
        Ok(*self.metadata.lock())
    }

    fn write_spm_status(&self, metadata: PoolMetadata) -> Result<(), StorageError> {
        *self.metadata.lock() = metadata;
        Ok(())
    }

    fn invalidate_metadata(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn master_domain(&self) -> DomainId {
        self.master
    }

    fn active_domains(&self) -> Result<Vec<DomainId>, StorageError> {
        Ok(self.domains.lock().clone())
    }

    fn mount_master(&self) -> Result<(), StorageError> {
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(StorageError::io(format!("cannot mount master of {}", self.id)));
        }
        self.mounted.store(true, Ordering::SeqCst);
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prepare_links(&self) -> Result<(), StorageError> {
        self.link_preparations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unmount_master(&self) -> Result<(), StorageError> {
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(StorageError::io(format!("master of {} is busy", self.id)));
        }
        self.mounted.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn tasks_dir(&self) -> PathBuf {
        self.tasks_dir.clone()
    }

    fn is_block_backed(&self) -> bool {
        self.mailbox.is_some()
    }

    fn mailbox(&self) -> Option<Arc<dyn MailboxStore>> {
        self.mailbox
            .as_ref()
            .map(|m| Arc::clone(m) as Arc<dyn MailboxStore>)
    }
}

/// Registry over [`MemoryPool`]s
#[derive(Default)]
pub struct MemoryPoolRegistry {
    pools: Mutex<HashMap<PoolId, Arc<MemoryPool>>>,
}

impl MemoryPoolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool
    pub fn insert(&self, pool: Arc<MemoryPool>) {
        self.pools.lock().insert(pool.id(), pool);
    }
}

impl PoolRegistry for MemoryPoolRegistry {
    fn get_pool(&self, pool: PoolId) -> Result<Arc<dyn PoolHandle>, StorageError> {
        self.pools
            .lock()
            .get(&pool)
            .map(|p| Arc::clone(p) as Arc<dyn PoolHandle>)
            .ok_or_else(|| StorageError::not_found(format!("pool {pool}")))
    }
}
