//! In-memory storage domains with an ordered upgrade log.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spm_core::effects::{DomainHandle, DomainRegistry};
use spm_core::{DomainClass, DomainId, DomainVersion, PoolId, StorageError};

use crate::sync::Gate;

/// One completed domain upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeEvent {
    /// Upgraded domain
    pub domain: DomainId,
    /// Version before the upgrade
    pub from: DomainVersion,
    /// Version after the upgrade
    pub to: DomainVersion,
}

/// Upgrade order across all domains of a registry
#[derive(Default)]
pub struct UpgradeLog {
    events: Mutex<Vec<UpgradeEvent>>,
}

impl UpgradeLog {
    /// Events in completion order
    pub fn events(&self) -> Vec<UpgradeEvent> {
        self.events.lock().clone()
    }

    /// Position of the first upgrade of `domain`
    pub fn position(&self, domain: DomainId) -> Option<usize> {
        self.events.lock().iter().position(|e| e.domain == domain)
    }
}

/// Domain whose version lives in memory.
pub struct MemoryDomain {
    id: DomainId,
    class: DomainClass,
    version: Mutex<DomainVersion>,
    pools: Vec<PoolId>,
    log: Arc<UpgradeLog>,
    upgrade_gate: Gate,
    fail_upgrade: AtomicBool,
}

impl MemoryDomain {
    /// Current version
    pub fn current_version(&self) -> DomainVersion {
        *self.version.lock()
    }

    /// Gate passed at the start of every upgrade
    pub fn upgrade_gate(&self) -> &Gate {
        &self.upgrade_gate
    }

    /// Make upgrades fail while set
    pub fn set_fail_upgrade(&self, fail: bool) {
        self.fail_upgrade.store(fail, Ordering::SeqCst);
    }
}

impl DomainHandle for MemoryDomain {
    fn id(&self) -> DomainId {
        self.id
    }

    fn version(&self) -> Result<DomainVersion, StorageError> {
        Ok(*self.version.lock())
    }

    fn upgrade(&self, target: DomainVersion) -> Result<(), StorageError> {
        self.upgrade_gate.pass();
        if self.fail_upgrade.load(Ordering::SeqCst) {
            return Err(StorageError::failed(format!("upgrade of {} failed", self.id)));
        }
        let mut version = self.version.lock();
        if target < *version {
            return Err(StorageError::failed(format!(
                "refusing to downgrade {} from {} to {target}",
                self.id, *version
            )));
        }
        self.log.events.lock().push(UpgradeEvent {
            domain: self.id,
            from: *version,
            to: target,
        });
        *version = target;
        Ok(())
    }

    fn domain_class(&self) -> DomainClass {
        self.class
    }

    fn pools(&self) -> Vec<PoolId> {
        self.pools.clone()
    }
}

/// Registry over [`MemoryDomain`]s sharing one upgrade log
#[derive(Default)]
pub struct MemoryDomainRegistry {
    domains: Mutex<HashMap<DomainId, Arc<MemoryDomain>>>,
    log: Arc<UpgradeLog>,
}

impl MemoryDomainRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a domain attached to `pools`
    pub fn create(
        &self,
        id: DomainId,
        class: DomainClass,
        version: DomainVersion,
        pools: Vec<PoolId>,
    ) -> Arc<MemoryDomain> {
        let domain = Arc::new(MemoryDomain {
            id,
            class,
            version: Mutex::new(version),
            pools,
            log: Arc::clone(&self.log),
            upgrade_gate: Gate::new(),
            fail_upgrade: AtomicBool::new(false),
        });
        self.domains.lock().insert(id, Arc::clone(&domain));
        domain
    }

    /// Registered domain
    pub fn get(&self, id: DomainId) -> Option<Arc<MemoryDomain>> {
        self.domains.lock().get(&id).cloned()
    }

    /// Shared upgrade log
    pub fn upgrade_log(&self) -> &UpgradeLog {
        &self.log
    }
}

impl DomainRegistry for MemoryDomainRegistry {
    fn produce(&self, domain: DomainId) -> Result<Arc<dyn DomainHandle>, StorageError> {
        self.domains
            .lock()
            .get(&domain)
            .map(|d| Arc::clone(d) as Arc<dyn DomainHandle>)
            .ok_or_else(|| StorageError::not_found(format!("domain {domain}")))
    }
}
