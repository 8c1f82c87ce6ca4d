//! Host-local shared/exclusive resource locks.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

use spm_core::effects::{ResourceGuard, ResourceManager};
use spm_core::{LockMode, StorageError};

use crate::sync::Gate;

type ResourceKey = (String, String);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Holders {
    shared: usize,
    exclusive: bool,
}

impl Holders {
    fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive,
            LockMode::Exclusive => !self.exclusive && self.shared == 0,
        }
    }
}

#[derive(Default)]
struct Table {
    locks: Mutex<HashMap<ResourceKey, Holders>>,
    changed: Condvar,
    parked: Mutex<HashMap<ResourceKey, Arc<Gate>>>,
}

impl Table {
    fn grant(self: &Arc<Self>, key: ResourceKey, mode: LockMode) -> ResourceGuard {
        let table = Arc::clone(self);
        let release_key = key.clone();
        ResourceGuard::new(key.0, key.1, mode, move || table.release(&release_key, mode))
    }

    fn take(holders: &mut Holders, mode: LockMode) {
        match mode {
            LockMode::Shared => holders.shared += 1,
            LockMode::Exclusive => holders.exclusive = true,
        }
    }

    fn release(&self, key: &ResourceKey, mode: LockMode) {
        let mut locks = self.locks.lock();
        if let Some(holders) = locks.get_mut(key) {
            match mode {
                LockMode::Shared => holders.shared = holders.shared.saturating_sub(1),
                LockMode::Exclusive => holders.exclusive = false,
            }
            if *holders == Holders::default() {
                locks.remove(key);
            }
        }
        self.changed.notify_all();
    }
}

/// Blocking resource manager backed by a mutex and condition variable.
#[derive(Clone, Default)]
pub struct LocalResourceManager {
    table: Arc<Table>,
}

impl LocalResourceManager {
    /// Manager with no resources held
    pub fn new() -> Self {
        Self::default()
    }

    /// `(shared holders, exclusively held)` for a resource
    pub fn holders(&self, namespace: &str, name: &str) -> (usize, bool) {
        let locks = self.table.locks.lock();
        locks
            .get(&(namespace.to_string(), name.to_string()))
            .map_or((0, false), |h| (h.shared, h.exclusive))
    }

    /// Whether nothing holds the resource
    pub fn is_free(&self, namespace: &str, name: &str) -> bool {
        self.holders(namespace, name) == (0, false)
    }

    /// Pause the next `acquire`/`try_acquire` of a resource before it is granted.
    ///
    /// The returned gate starts closed; later requests are not paused.
    pub fn park_next(&self, namespace: &str, name: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        gate.close();
        self.table.parked.lock().insert(
            (namespace.to_string(), name.to_string()),
            Arc::clone(&gate),
        );
        gate
    }

    fn pass_parked(&self, key: &ResourceKey) {
        let gate = self.table.parked.lock().remove(key);
        if let Some(gate) = gate {
            gate.pass();
        }
    }
}

impl ResourceManager for LocalResourceManager {
    fn acquire(
        &self,
        namespace: &str,
        name: &str,
        mode: LockMode,
    ) -> Result<ResourceGuard, StorageError> {
        let key = (namespace.to_string(), name.to_string());
        self.pass_parked(&key);
        let mut locks = self.table.locks.lock();
        loop {
            let holders = locks.entry(key.clone()).or_default();
            if holders.admits(mode) {
                Table::take(holders, mode);
                break;
            }
            self.table.changed.wait(&mut locks);
        }
        drop(locks);
        Ok(self.table.grant(key, mode))
    }

    fn try_acquire(&self, namespace: &str, name: &str, mode: LockMode) -> Option<ResourceGuard> {
        let key = (namespace.to_string(), name.to_string());
        self.pass_parked(&key);
        let mut locks = self.table.locks.lock();
        let holders = locks.entry(key.clone()).or_default();
        if !holders.admits(mode) {
            return None;
        }
        Table::take(holders, mode);
        drop(locks);
        Some(self.table.grant(key, mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_holders_exclude_writer() {
        let manager = LocalResourceManager::new();
        let a = manager.acquire("Storage", "sd", LockMode::Shared).unwrap();
        let b = manager.try_acquire("Storage", "sd", LockMode::Shared).unwrap();
        assert!(manager
            .try_acquire("Storage", "sd", LockMode::Exclusive)
            .is_none());
        drop(a);
        drop(b);
        assert!(manager.is_free("Storage", "sd"));
        assert!(manager
            .try_acquire("Storage", "sd", LockMode::Exclusive)
            .is_some());
    }

    #[test]
    fn test_exclusive_waiter_wakes_on_release() {
        let manager = LocalResourceManager::new();
        let held = manager.acquire("Storage", "pool", LockMode::Exclusive).unwrap();
        let waiter = {
            let manager = manager.clone();
            std::thread::spawn(move || {
                let _guard = manager.acquire("Storage", "pool", LockMode::Exclusive).unwrap();
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());
        drop(held);
        waiter.join().unwrap();
        assert!(manager.is_free("Storage", "pool"));
    }

    #[test]
    fn test_park_next_pauses_only_one_request() {
        let manager = LocalResourceManager::new();
        let gate = manager.park_next("Storage", "pool");
        let parked = {
            let manager = manager.clone();
            std::thread::spawn(move || {
                manager
                    .try_acquire("Storage", "pool", LockMode::Exclusive)
                    .is_some()
            })
        };
        assert!(gate.wait_for_waiters(1, std::time::Duration::from_secs(5)));

        let unparked = manager.acquire("Storage", "pool", LockMode::Exclusive).unwrap();
        drop(unparked);
        gate.open();
        assert!(parked.join().unwrap());
        assert!(manager.is_free("Storage", "pool"));
    }
}
