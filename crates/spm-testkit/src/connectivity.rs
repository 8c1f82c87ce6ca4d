//! Connectivity reports driven by the test.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use spm_core::effects::{ConnectivityCallback, ConnectivityMonitor, SubscriptionId};
use spm_core::DomainId;

/// Monitor whose domain states are set by hand.
///
/// Callbacks run synchronously on the thread calling [`set_valid`](Self::set_valid).
#[derive(Default)]
pub struct ManualConnectivityMonitor {
    valid: Mutex<HashSet<DomainId>>,
    subscribers: Mutex<HashMap<u64, ConnectivityCallback>>,
    next_id: AtomicU64,
}

impl ManualConnectivityMonitor {
    /// Monitor with every domain invalid
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a domain's state without notifying subscribers
    pub fn mark(&self, domain: DomainId, valid: bool) {
        let mut set = self.valid.lock();
        if valid {
            set.insert(domain);
        } else {
            set.remove(&domain);
        }
    }

    /// Set a domain's state and notify subscribers
    pub fn set_valid(&self, domain: DomainId, valid: bool) {
        self.mark(domain, valid);
        let callbacks: Vec<ConnectivityCallback> =
            self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(domain, valid);
        }
    }

    /// Number of registered callbacks
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl ConnectivityMonitor for ManualConnectivityMonitor {
    fn is_valid(&self, domain: DomainId) -> bool {
        self.valid.lock().contains(&domain)
    }

    fn register(&self, callback: ConnectivityCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().insert(id, callback);
        SubscriptionId(id)
    }

    fn unregister(&self, subscription: SubscriptionId) {
        self.subscribers.lock().remove(&subscription.0);
    }
}
