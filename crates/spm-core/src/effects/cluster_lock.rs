//! Lease-based cluster-wide mutual exclusion over a pool.

use crate::errors::StorageError;
use crate::identifiers::{HostId, PoolId};

/// Distributed lock deciding which host may act as SPM for a pool.
///
/// The lease protocol itself is opaque; the coordinator only relies on
/// "at most one holder per pool" while `acquire` has returned `Ok` and
/// `release` has not yet been called.
pub trait ClusterLock: Send + Sync {
    /// Block until `host` holds the pool lease, or fail
    fn acquire(&self, pool: PoolId, host: HostId) -> Result<(), StorageError>;

    /// Give up the pool lease held by this host
    fn release(&self, pool: PoolId) -> Result<(), StorageError>;

    /// Invalidate the lease of a host presumed dead
    fn fence(&self, pool: PoolId, last_owner: Option<HostId>) -> Result<(), StorageError>;
}
