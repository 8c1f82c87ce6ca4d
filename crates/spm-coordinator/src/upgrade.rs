//! Master-first domain upgrade campaign
//!
//! A campaign raises every DATA domain of a pool to a target version. The
//! master domain is upgraded synchronously while the campaign resource
//! (`upgrade_<pool>`) is held exclusively; dependent domains are then upgraded
//! by one worker thread each, holding the campaign resource shared, so no
//! dependent can move before the master has committed.
//!
//! Dependents that are unreachable when the campaign starts stay pending and
//! are picked up by a connectivity callback when they become valid. The
//! callback is removed once nothing is pending.
//!
//! Campaigns only run between [`MasterDomainUpgrader::open`] and
//! [`MasterDomainUpgrader::shutdown`]. Shutdown closes the upgrader while it
//! holds the campaign resource, so a request that was authorized before a
//! release but reaches the resource after it is refused.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::thread;

use spm_core::config::UpgradeConfig;
use spm_core::effects::{
    ConnectivityMonitor, DomainHandle, DomainRegistry, PoolHandle, PoolRegistry, ResourceManager,
    SubscriptionId,
};
use spm_core::types::{upgrade_resource, LockMode, STORAGE_NAMESPACE};
use spm_core::{
    DomainId, DomainVersion, PoolId, Role, SpmContext, SpmError, SpmResult, StorageError,
};
use tracing::{debug, info, warn};

use crate::guard::SpmOperation;

// =============================================================================
// Reports
// =============================================================================

/// Reply to a successful upgrade request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeStarted {
    /// Always `"started"`
    pub status: String,
    /// Version the campaign is driving domains to
    pub target: DomainVersion,
}

impl UpgradeStarted {
    fn new(target: DomainVersion) -> Self {
        Self {
            status: "started".to_string(),
            target,
        }
    }
}

/// Snapshot of the running campaign
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStatus {
    /// Target version, `None` when no campaign is running
    pub target: Option<DomainVersion>,
    /// Domains still waiting for an upgrade
    pub pending: Vec<DomainId>,
}

// =============================================================================
// Upgrader
// =============================================================================

#[derive(Default)]
struct CampaignState {
    /// Set while this host holds the SPM role
    open: bool,
    target: Option<DomainVersion>,
    pending: BTreeSet<DomainId>,
    in_flight: HashSet<DomainId>,
    subscription: Option<SubscriptionId>,
}

struct UpgraderInner {
    pool: PoolId,
    pools: Arc<dyn PoolRegistry>,
    domains: Arc<dyn DomainRegistry>,
    resources: Arc<dyn ResourceManager>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    supported: UpgradeConfig,
    state: Mutex<CampaignState>,
}

/// Drives upgrade campaigns for one pool.
pub struct MasterDomainUpgrader {
    inner: Arc<UpgraderInner>,
}

impl MasterDomainUpgrader {
    /// Create an idle upgrader for `pool`
    pub fn new(pool: PoolId, ctx: &SpmContext) -> Self {
        Self {
            inner: Arc::new(UpgraderInner {
                pool,
                pools: Arc::clone(&ctx.pools),
                domains: Arc::clone(&ctx.domains),
                resources: Arc::clone(&ctx.resources),
                connectivity: Arc::clone(&ctx.connectivity),
                supported: ctx.config.upgrade.clone(),
                state: Mutex::new(CampaignState::default()),
            }),
        }
    }

    /// Accept campaigns; called by an election before its own campaign
    pub fn open(&self) {
        self.inner.state.lock().open = true;
    }

    /// Refuse new campaigns without waiting for a running one
    pub fn close(&self) {
        self.inner.state.lock().open = false;
    }

    /// Run a campaign to `target`, or to the master's current version.
    ///
    /// Returns once the master domain is at the target and workers for the
    /// reachable dependents have been dispatched.
    pub fn run_campaign(
        &self,
        pool: &dyn PoolHandle,
        target: Option<DomainVersion>,
    ) -> SpmResult<UpgradeStarted> {
        let inner = &self.inner;
        let resource = upgrade_resource(inner.pool);
        let Some(_campaign) =
            inner
                .resources
                .try_acquire(STORAGE_NAMESPACE, &resource, LockMode::Exclusive)
        else {
            debug!(pool = %inner.pool, "Upgrade campaign resource is busy");
            return Err(SpmError::UpgradeInProgress { pool: inner.pool });
        };
        {
            let state = inner.state.lock();
            if !state.open {
                debug!(pool = %inner.pool, "Upgrader closed, SPM role was released");
                return Err(SpmError::authorization(
                    inner.pool,
                    SpmOperation::UpgradePool.name(),
                    Role::Free,
                ));
            }
            if !state.pending.is_empty() {
                return Err(SpmError::UpgradeInProgress { pool: inner.pool });
            }
        }
        if let Some(version) = target {
            if !inner.supported.supports(version) {
                return Err(SpmError::UnsupportedVersion { version });
            }
        }

        let master_id = pool.master_domain();
        let master = inner.domains.produce(master_id)?;
        let master_version = master.version()?;
        let target = target.unwrap_or(master_version);
        let active = pool.active_domains()?;
        inner.check_known_versions(master_id, master_version, &active, target)?;

        {
            let _master_lock = inner.resources.acquire(
                STORAGE_NAMESPACE,
                &master_id.to_string(),
                LockMode::Exclusive,
            )?;
            if master_version < target {
                info!(
                    pool = %inner.pool,
                    domain = %master_id,
                    from = master_version,
                    to = target,
                    "Upgrading master domain"
                );
                master.upgrade(target)?;
            }
        }

        let pending: BTreeSet<DomainId> =
            active.into_iter().filter(|d| *d != master_id).collect();
        if pending.is_empty() {
            info!(pool = %inner.pool, target, "Upgrade campaign finished with master domain");
            return Ok(UpgradeStarted::new(target));
        }

        {
            let mut state = inner.state.lock();
            state.target = Some(target);
            state.pending.clone_from(&pending);
        }

        let weak = Arc::downgrade(inner);
        let subscription = inner.connectivity.register(Arc::new(move |domain, valid| {
            if !valid {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                UpgraderInner::dispatch(&inner, domain);
            }
        }));
        inner.state.lock().subscription = Some(subscription);

        for domain in &pending {
            if inner.connectivity.is_valid(*domain) {
                UpgraderInner::dispatch(inner, *domain);
            } else {
                debug!(pool = %inner.pool, domain = %domain, "Domain unreachable, upgrade deferred");
            }
        }

        info!(
            pool = %inner.pool,
            target,
            pending = pending.len(),
            "Upgrade campaign started"
        );
        Ok(UpgradeStarted::new(target))
    }

    /// Stop the campaign and close the upgrader: wait for the campaign
    /// resource, drop the connectivity callback and forget pending domains.
    ///
    /// Workers already upgrading a domain finish that domain.
    pub fn shutdown(&self) -> SpmResult<()> {
        let inner = &self.inner;
        let _campaign = inner.resources.acquire(
            STORAGE_NAMESPACE,
            &upgrade_resource(inner.pool),
            LockMode::Exclusive,
        )?;
        let subscription = {
            let mut state = inner.state.lock();
            if !state.pending.is_empty() {
                debug!(
                    pool = %inner.pool,
                    pending = state.pending.len(),
                    "Dropping pending domain upgrades"
                );
            }
            state.open = false;
            state.pending.clear();
            state.target = None;
            state.subscription.take()
        };
        if let Some(subscription) = subscription {
            inner.connectivity.unregister(subscription);
        }
        Ok(())
    }

    /// Current campaign snapshot
    pub fn status(&self) -> UpgradeStatus {
        let state = self.inner.state.lock();
        UpgradeStatus {
            target: state.target,
            pending: state.pending.iter().copied().collect(),
        }
    }

    /// Whether any domain is still pending
    pub fn is_active(&self) -> bool {
        !self.inner.state.lock().pending.is_empty()
    }
}

impl UpgraderInner {
    fn check_known_versions(
        &self,
        master: DomainId,
        master_version: DomainVersion,
        active: &[DomainId],
        target: DomainVersion,
    ) -> SpmResult<()> {
        if master_version > target {
            return Err(SpmError::VersionTooAdvanced {
                domain: master,
                current: master_version,
                requested: target,
            });
        }
        for domain in active.iter().filter(|d| **d != master) {
            if !self.connectivity.is_valid(*domain) {
                continue;
            }
            let version = match self.domains.produce(*domain).and_then(|h| h.version()) {
                Ok(version) => version,
                Err(e) => {
                    debug!(domain = %domain, error = %e, "Domain version unknown");
                    continue;
                }
            };
            if version > target {
                return Err(SpmError::VersionTooAdvanced {
                    domain: *domain,
                    current: version,
                    requested: target,
                });
            }
        }
        Ok(())
    }

    fn dispatch(inner: &Arc<Self>, domain: DomainId) {
        {
            let mut state = inner.state.lock();
            if !state.pending.contains(&domain) || !state.in_flight.insert(domain) {
                return;
            }
        }
        let worker = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(format!("upgrade-{domain}"))
            .spawn(move || worker.upgrade_domain(domain));
        if let Err(e) = spawned {
            warn!(domain = %domain, error = %e, "Failed to spawn domain upgrade worker");
            inner.state.lock().in_flight.remove(&domain);
        }
    }

    fn upgrade_domain(&self, domain: DomainId) {
        let done = match self.try_upgrade_domain(domain) {
            Ok(done) => done,
            Err(e) => {
                warn!(
                    pool = %self.pool,
                    domain = %domain,
                    error = %e,
                    "Domain upgrade failed, left pending"
                );
                false
            }
        };

        let finished = {
            let mut state = self.state.lock();
            state.in_flight.remove(&domain);
            if done {
                state.pending.remove(&domain);
            }
            if state.pending.is_empty() && state.target.is_some() {
                state.target = None;
                state.subscription.take()
            } else {
                None
            }
        };
        if let Some(subscription) = finished {
            self.connectivity.unregister(subscription);
            info!(pool = %self.pool, "Upgrade campaign complete");
        }
    }

    /// Upgrade one dependent; `Ok(true)` when it can leave the pending set.
    fn try_upgrade_domain(&self, domain: DomainId) -> Result<bool, StorageError> {
        let _campaign = self.resources.acquire(
            STORAGE_NAMESPACE,
            &upgrade_resource(self.pool),
            LockMode::Shared,
        )?;
        let _domain_lock =
            self.resources
                .acquire(STORAGE_NAMESPACE, &domain.to_string(), LockMode::Exclusive)?;

        if !self.state.lock().pending.contains(&domain) {
            return Ok(false);
        }

        let handle = self.domains.produce(domain)?;
        let Some(target) = self.owning_master_version(handle.as_ref()) else {
            warn!(domain = %domain, "Master version of owning pool unknown, skipping upgrade");
            return Ok(false);
        };
        if !handle.domain_class().is_data() {
            info!(
                domain = %domain,
                class = %handle.domain_class(),
                "Removing non-data domain from upgrade campaign"
            );
            return Ok(true);
        }
        let version = handle.version()?;
        if version >= target {
            debug!(domain = %domain, version, target, "Domain already upgraded");
            return Ok(true);
        }
        handle.upgrade(target)?;
        info!(domain = %domain, from = version, to = target, "Domain upgraded");
        Ok(true)
    }

    fn owning_master_version(&self, handle: &dyn DomainHandle) -> Option<DomainVersion> {
        let pools = handle.pools();
        let pool_id = pools
            .iter()
            .copied()
            .find(|p| *p == self.pool)
            .or_else(|| pools.first().copied())?;
        let pool = self.pools.get_pool(pool_id).ok()?;
        let master = self.domains.produce(pool.master_domain()).ok()?;
        master.version().ok()
    }
}
