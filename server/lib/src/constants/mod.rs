// Re-export as needed

pub mod entries;
pub mod schema;

pub use crate::constants::entries::*;

use std::time::Duration;

pub use dirsrv_proto::constants::*;

/// Number of stripes in a partition's entry lock table when not configured.
pub const DEFAULT_ENTRY_LOCK_STRIPES: usize = 64;

/// Attributes carrying an equality index in every partition, in addition to those
/// the partition configures.
pub const SYSTEM_INDEXED_ATTRIBUTES: &[&str] = &[
    ATTR_OBJECTCLASS,
    ATTR_ENTRY_UUID,
    ATTR_ENTRY_CSN,
    ATTR_ADMINISTRATIVE_ROLE,
    ATTR_ACCESS_CONTROL_SUBENTRIES,
    ATTR_COLLECTIVE_ATTRIBUTE_SUBENTRIES,
];

/// Attributes indexed in the system partition.
pub const SYSTEM_PARTITION_INDEXED_ATTRIBUTES: &[&str] = &[ATTR_CN, ATTR_OU, ATTR_UID];

pub const DEFAULT_MAX_SIZE_LIMIT: usize = 1000;
pub const DEFAULT_MAX_TIME_LIMIT: Duration = Duration::from_secs(60);

/// The OID of the superior of every collective exclusion, meaning "all of them".
pub const OID_EXCLUDE_ALL_COLLECTIVE_ATTRIBUTES: &str = "2.5.18.0";

/// The replica id stamped into entryCSN values.
pub const DEFAULT_REPLICA_ID: u16 = 0;
