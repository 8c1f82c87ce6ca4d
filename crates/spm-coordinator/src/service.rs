//! Host-wide SPM service: one coordinator per pool.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use spm_core::{DomainVersion, HostId, PoolId, SpmContext, SpmError, SpmResult, SpmStatus};
use tracing::{info, warn};

use crate::coordinator::{SpmCoordinator, StartRequest};
use crate::upgrade::UpgradeStarted;

/// Maps pool ids to their coordinators, creating them on first use.
pub struct SpmService {
    ctx: SpmContext,
    coordinators: RwLock<HashMap<PoolId, Arc<SpmCoordinator>>>,
}

impl SpmService {
    /// Create a service with no pools
    pub fn new(ctx: SpmContext) -> Self {
        Self {
            ctx,
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    /// Coordinator for `pool`
    pub fn coordinator(&self, pool: PoolId) -> Arc<SpmCoordinator> {
        if let Some(existing) = self.coordinators.read().get(&pool) {
            return Arc::clone(existing);
        }
        let mut coordinators = self.coordinators.write();
        Arc::clone(
            coordinators
                .entry(pool)
                .or_insert_with(|| Arc::new(SpmCoordinator::new(pool, self.ctx.clone()))),
        )
    }

    /// Pools that have a coordinator
    pub fn pools(&self) -> Vec<PoolId> {
        let mut pools: Vec<PoolId> = self.coordinators.read().keys().copied().collect();
        pools.sort();
        pools
    }

    /// Become SPM for `pool`
    pub fn start(&self, pool: PoolId, request: &StartRequest) -> SpmResult<()> {
        self.coordinator(pool).start(request)
    }

    /// Role and metadata of `pool`
    pub fn get_status(&self, pool: PoolId) -> SpmResult<SpmStatus> {
        self.coordinator(pool).get_status()
    }

    /// Fence the previous SPM of `pool`
    pub fn fence(
        &self,
        pool: PoolId,
        last_owner: Option<HostId>,
        last_lver: i64,
    ) -> SpmResult<SpmStatus> {
        self.coordinator(pool).fence(last_owner, last_lver)
    }

    /// Give up the SPM role for `pool`
    pub fn stop(&self, pool: PoolId) -> SpmResult<()> {
        self.coordinator(pool).stop()
    }

    /// Start an upgrade campaign on `pool`
    pub fn upgrade_pool(&self, pool: PoolId, target: DomainVersion) -> SpmResult<UpgradeStarted> {
        self.coordinator(pool).upgrade_pool(target)
    }

    /// Stop every pool this host is SPM for; returns the pools that failed
    pub fn stop_all(&self) -> Vec<(PoolId, SpmError)> {
        let coordinators: Vec<Arc<SpmCoordinator>> =
            self.coordinators.read().values().cloned().collect();
        let mut failures = Vec::new();
        for coordinator in coordinators {
            if let Err(e) = coordinator.stop() {
                warn!(pool = %coordinator.pool_id(), error = %e, "Failed to stop SPM");
                failures.push((coordinator.pool_id(), e));
            }
        }
        info!(failed = failures.len(), "Stopped all SPM roles");
        failures
    }
}
