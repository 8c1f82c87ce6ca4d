//! Storage domain access.

use std::sync::Arc;

use crate::errors::StorageError;
use crate::identifiers::{DomainId, PoolId};
use crate::types::{DomainClass, DomainVersion};

/// One storage domain as seen from this host.
pub trait DomainHandle: Send + Sync {
    /// Domain identifier
    fn id(&self) -> DomainId;

    /// Current on-disk format version
    fn version(&self) -> Result<DomainVersion, StorageError>;

    /// Convert the domain to `target`; never called with a lower version
    fn upgrade(&self, target: DomainVersion) -> Result<(), StorageError>;

    /// Domain class
    fn domain_class(&self) -> DomainClass;

    /// Pools the domain is attached to
    fn pools(&self) -> Vec<PoolId>;
}

/// Looks up (and if needed, produces) domain handles.
pub trait DomainRegistry: Send + Sync {
    /// Get the handle for a domain
    fn produce(&self, domain: DomainId) -> Result<Arc<dyn DomainHandle>, StorageError>;
}
