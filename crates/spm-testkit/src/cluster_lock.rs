//! In-memory pool lease.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;

use spm_core::effects::ClusterLock;
use spm_core::{HostId, PoolId, StorageError};
use tracing::debug;

use crate::sync::Gate;

#[derive(Default)]
struct LeaseState {
    holders: HashMap<PoolId, HostId>,
    fail_next_acquire: Option<StorageError>,
    fail_release: bool,
    acquires: usize,
    releases: usize,
    fences: Vec<(PoolId, Option<HostId>)>,
}

/// Lease table shared by every simulated host of a test.
///
/// `acquire` blocks while another host holds the pool, like a real lease.
#[derive(Default)]
pub struct MemoryClusterLock {
    state: Mutex<LeaseState>,
    released: Condvar,
    acquire_gate: Gate,
}

impl MemoryClusterLock {
    /// Empty lease table
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `host` holds the pool lease
    pub fn seize(&self, pool: PoolId, host: HostId) {
        self.state.lock().holders.insert(pool, host);
    }

    /// Current holder
    pub fn holder(&self, pool: PoolId) -> Option<HostId> {
        self.state.lock().holders.get(&pool).copied()
    }

    /// Make the next `acquire` fail with `error`
    pub fn fail_next_acquire(&self, error: StorageError) {
        self.state.lock().fail_next_acquire = Some(error);
    }

    /// Make every `release` fail while set
    pub fn set_fail_release(&self, fail: bool) {
        self.state.lock().fail_release = fail;
    }

    /// Gate passed at the start of every `acquire`
    pub fn acquire_gate(&self) -> &Gate {
        &self.acquire_gate
    }

    /// Successful acquisitions
    pub fn acquire_count(&self) -> usize {
        self.state.lock().acquires
    }

    /// Successful releases
    pub fn release_count(&self) -> usize {
        self.state.lock().releases
    }

    /// Fence calls, in order
    pub fn fences(&self) -> Vec<(PoolId, Option<HostId>)> {
        self.state.lock().fences.clone()
    }
}

impl ClusterLock for MemoryClusterLock {
    fn acquire(&self, pool: PoolId, host: HostId) -> Result<(), StorageError> {
        self.acquire_gate.pass();
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next_acquire.take() {
            return Err(error);
        }
        loop {
            match state.holders.get(&pool) {
                None => {
                    state.holders.insert(pool, host);
                    state.acquires += 1;
                    debug!(pool = %pool, host = %host, "Lease acquired");
                    return Ok(());
                }
                Some(holder) if *holder == host => return Ok(()),
                Some(_) => self.released.wait(&mut state),
            }
        }
    }

    fn release(&self, pool: PoolId) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.fail_release {
            return Err(StorageError::lock(format!("lease on {pool} could not be released")));
        }
        if state.holders.remove(&pool).is_some() {
            state.releases += 1;
        }
        self.released.notify_all();
        Ok(())
    }

    fn fence(&self, pool: PoolId, last_owner: Option<HostId>) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.fences.push((pool, last_owner));
        let matches = match (state.holders.get(&pool), last_owner) {
            (Some(holder), Some(owner)) => *holder == owner,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            state.holders.remove(&pool);
        }
        self.released.notify_all();
        Ok(())
    }
}
