//! Storage domain classification and versioning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// On-disk format version of a storage domain
pub type DomainVersion = u32;

/// Class of a storage domain.
///
/// The master domain is not a class of its own: it is a DATA domain that the
/// pool designates to hold pool-wide metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainClass {
    /// Holds VM disks; the only class upgraded by a campaign
    Data,
    /// Holds installation media
    Iso,
    /// Export/backup domain
    Backup,
}

impl DomainClass {
    /// Whether domains of this class follow the pool's version
    pub fn is_data(self) -> bool {
        matches!(self, DomainClass::Data)
    }
}

impl fmt::Display for DomainClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainClass::Data => write!(f, "DATA"),
            DomainClass::Iso => write!(f, "ISO"),
            DomainClass::Backup => write!(f, "BACKUP"),
        }
    }
}
