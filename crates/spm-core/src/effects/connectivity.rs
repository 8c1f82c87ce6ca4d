//! Domain connectivity reports.

use crate::identifiers::DomainId;
use std::sync::Arc;

/// Callback invoked with `(domain, is_valid)` when a domain's reachability
/// changes.
pub type ConnectivityCallback = Arc<dyn Fn(DomainId, bool) + Send + Sync>;

/// Handle returned by [`ConnectivityMonitor::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Source of domain reachability events (the domain monitor).
pub trait ConnectivityMonitor: Send + Sync {
    /// Whether the domain is currently reachable from this host
    fn is_valid(&self, domain: DomainId) -> bool;

    /// Subscribe to reachability changes
    fn register(&self, callback: ConnectivityCallback) -> SubscriptionId;

    /// Drop a subscription; unknown ids are ignored
    fn unregister(&self, subscription: SubscriptionId);
}
