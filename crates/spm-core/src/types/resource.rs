//! Resource names and lock modes shared by the coordinator and jobs.
//!
//! Resources are addressed by `(namespace, name)`. Pools and domains live in
//! the [`STORAGE_NAMESPACE`]; images live in a per-domain namespace so that
//! the same image id on two domains never contends.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identifiers::{DomainId, ImageId, PoolId};

/// Namespace for pool, domain and campaign resources
pub const STORAGE_NAMESPACE: &str = "Storage";

/// Shared or exclusive ownership of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Any number of shared holders, no exclusive holder
    Shared,
    /// Single holder
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// One resource lock a job must hold while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceClaim {
    /// Resource namespace
    pub namespace: String,
    /// Resource name within the namespace
    pub name: String,
    /// Requested mode
    pub mode: LockMode,
}

impl ResourceClaim {
    /// Claim on a pool's metadata
    pub fn pool(pool: PoolId, mode: LockMode) -> Self {
        Self {
            namespace: STORAGE_NAMESPACE.to_string(),
            name: pool.to_string(),
            mode,
        }
    }

    /// Claim on a storage domain
    pub fn domain(domain: DomainId, mode: LockMode) -> Self {
        Self {
            namespace: STORAGE_NAMESPACE.to_string(),
            name: domain.to_string(),
            mode,
        }
    }

    /// Claim on an image inside a domain
    pub fn image(domain: DomainId, image: ImageId, mode: LockMode) -> Self {
        Self {
            namespace: image_namespace(domain),
            name: image.to_string(),
            mode,
        }
    }
}

/// Namespace holding the images of one domain
pub fn image_namespace(domain: DomainId) -> String {
    format!("{domain}_imageNS")
}

/// Name of the campaign resource serializing upgrades of one pool
pub fn upgrade_resource(pool: PoolId) -> String {
    format!("upgrade_{pool}")
}
