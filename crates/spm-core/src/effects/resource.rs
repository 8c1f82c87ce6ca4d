//! Namespaced shared/exclusive resource locks.

use std::fmt;

use crate::errors::StorageError;
use crate::types::{LockMode, ResourceClaim};

/// A granted resource lock, released when dropped.
pub struct ResourceGuard {
    namespace: String,
    name: String,
    mode: LockMode,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ResourceGuard {
    /// Wrap a grant together with the action that releases it
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        mode: LockMode,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            mode,
            release: Some(Box::new(release)),
        }
    }

    /// Resource namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Granted mode
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Host-local lock service over `(namespace, name)` resources.
pub trait ResourceManager: Send + Sync {
    /// Block until the resource is granted in `mode`
    fn acquire(
        &self,
        namespace: &str,
        name: &str,
        mode: LockMode,
    ) -> Result<ResourceGuard, StorageError>;

    /// Grant the resource only if it is available right now
    fn try_acquire(&self, namespace: &str, name: &str, mode: LockMode) -> Option<ResourceGuard>;

    /// Acquire a single claim
    fn acquire_claim(&self, claim: &ResourceClaim) -> Result<ResourceGuard, StorageError> {
        self.acquire(&claim.namespace, &claim.name, claim.mode)
    }

    /// Acquire claims in order; on failure, already granted locks are released
    fn acquire_all(&self, claims: &[ResourceClaim]) -> Result<Vec<ResourceGuard>, StorageError> {
        let mut guards = Vec::with_capacity(claims.len());
        for claim in claims {
            guards.push(self.acquire_claim(claim)?);
        }
        Ok(guards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_guard_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let guard = ResourceGuard::new("Storage", "pool", LockMode::Exclusive, move || {
            flag.store(true, Ordering::SeqCst)
        });
        assert_eq!(guard.mode(), LockMode::Exclusive);
        assert!(!released.load(Ordering::SeqCst));
        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }
}
