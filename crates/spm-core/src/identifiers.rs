//! Identifier types for pools, domains, images, volumes, tasks and hosts
//!
//! Storage objects are addressed by UUID on shared storage; hosts are
//! addressed by the small integer written into pool metadata as `spmId`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from a UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            pub fn uuid(&self) -> Uuid {
                self.0
            }

            /// Raw UUID bytes, as stored in fixed-size on-disk records
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Rebuild from raw UUID bytes
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_identifier!(
    /// Storage pool identifier (spUUID)
    PoolId
);

uuid_identifier!(
    /// Storage domain identifier (sdUUID)
    DomainId
);

uuid_identifier!(
    /// Image identifier within a storage domain
    ImageId
);

uuid_identifier!(
    /// Volume identifier within an image
    VolumeId
);

uuid_identifier!(
    /// Scheduled task identifier
    TaskId
);

/// Host identifier as written into pool metadata.
///
/// Host ids start at 1; the value `-1` in metadata means "no SPM".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub u32);

impl HostId {
    /// Create a new host id
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Value as written in the `spmId` metadata field
    pub fn as_spm_id(&self) -> i64 {
        i64::from(self.0)
    }

    /// Interpret a metadata `spmId`, returning `None` for unclaimed pools
    pub fn from_spm_id(spm_id: i64) -> Option<Self> {
        u32::try_from(spm_id).ok().filter(|id| *id > 0).map(Self)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_display_roundtrips_through_parse() {
        let pool = PoolId::new();
        let parsed: PoolId = pool.to_string().parse().unwrap();
        assert_eq!(pool, parsed);
    }

    #[test]
    fn test_identifier_bytes() {
        let domain = DomainId::new();
        assert_eq!(DomainId::from_bytes(*domain.as_bytes()), domain);
    }

    #[test]
    fn test_host_id_spm_id_mapping() {
        assert_eq!(HostId::from_spm_id(-1), None);
        assert_eq!(HostId::from_spm_id(0), None);
        assert_eq!(HostId::from_spm_id(3), Some(HostId(3)));
        assert_eq!(HostId(7).as_spm_id(), 7);
    }

    #[test]
    fn test_task_id_serializes_as_plain_uuid() {
        let task = TaskId::from_uuid(Uuid::nil());
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
