mod metadata;
mod object;
mod versioning;
mod engine;
mod store;
mod client;
mod informer;
mod filter;

mod node;
mod disk;
mod volume;
mod replica;
mod operations;
mod group;
mod snapshot;
mod cluster;
mod dataset;

pub use metadata::{ObjectKey, ObjectMeta};
pub use object::Resource;
pub use versioning::merge_patch;
pub use engine::MemoryStore;
pub use store::{RawEvent, RecordStore};
pub use client::Api;
pub use informer::{EventHandler, Informer, WatchEvent};
pub use filter::{Filterable, ListFilter};

pub use node::*;
pub use disk::*;
pub use volume::*;
pub use replica::*;
pub use operations::*;
pub use group::*;
pub use snapshot::*;
pub use cluster::*;
pub use dataset::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const GROUP_VERSION: &str = "hwameistor.io/v1alpha1";
pub const CSI_DRIVER_NAME: &str = "lvm.hwameistor.io";

pub const POOL_NAME_PREFIX: &str = "LocalStorage_Pool";
pub const POOL_NAME_HDD: &str = "LocalStorage_PoolHDD";
pub const POOL_NAME_SSD: &str = "LocalStorage_PoolSSD";
pub const POOL_NAME_NVME: &str = "LocalStorage_PoolNVMe";

pub const VOLUME_GROUP_FINALIZER: &str = "hwameistor.io/localvolumegroup-protection";
pub const CONTROLLER_LEASE_NAME: &str = "dce-uds-local-storage-master";
pub const DATASET_ANNOTATION: &str = "hwameistor.io/acceleration-dataset";
pub const TOPOLOGY_NODE_KEY: &str = "topology.lvm.hwameistor.io/node";

pub const MIB: i64 = 1024 * 1024;
pub const GIB: i64 = 1024 * MIB;

/// Replicas and expansions within this distance of their target count as done.
pub const VOLUME_EXPANSION_CAPACITY_BYTES_MIN: i64 = 10 * MIB;
/// Physical extent size of the volume groups backing the pools.
pub const LVM_EXTENT_SIZE: i64 = 4 * MIB;
pub const DEFAULT_MAX_HA_VOLUME_COUNT: i32 = 1000;
/// Logical volumes one LVM pool may hold.
pub const LVM_VOLUME_MAX_COUNT: i64 = 1000;
pub const MAX_REPLICA_NUMBER: i64 = 4;

/// Rounds a capacity up to a whole number of extents.
pub fn round_to_extent(bytes: i64) -> i64 {
    if bytes <= 0 {
        return 0;
    }
    (bytes + LVM_EXTENT_SIZE - 1) / LVM_EXTENT_SIZE * LVM_EXTENT_SIZE
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VolumeKind {
    #[default]
    #[serde(rename = "LVM")]
    Lvm,
    #[serde(rename = "Disk")]
    Disk,
    #[serde(rename = "RAM")]
    Ram,
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeKind::Lvm => write!(f, "LVM"),
            VolumeKind::Disk => write!(f, "Disk"),
            VolumeKind::Ram => write!(f, "RAM"),
        }
    }
}

impl FromStr for VolumeKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LVM" => Ok(VolumeKind::Lvm),
            "Disk" => Ok(VolumeKind::Disk),
            "RAM" => Ok(VolumeKind::Ram),
            other => Err(StoreError::Invalid(format!("unknown volume kind {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiskClass {
    #[default]
    #[serde(rename = "HDD")]
    Hdd,
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "NVMe")]
    NVMe,
}

impl DiskClass {
    pub fn pool_name(&self) -> &'static str {
        match self {
            DiskClass::Hdd => POOL_NAME_HDD,
            DiskClass::Ssd => POOL_NAME_SSD,
            DiskClass::NVMe => POOL_NAME_NVME,
        }
    }

    pub fn from_pool_name(pool: &str) -> Option<Self> {
        match pool {
            POOL_NAME_HDD => Some(DiskClass::Hdd),
            POOL_NAME_SSD => Some(DiskClass::Ssd),
            POOL_NAME_NVME => Some(DiskClass::NVMe),
            _ => None,
        }
    }
}

impl fmt::Display for DiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskClass::Hdd => write!(f, "HDD"),
            DiskClass::Ssd => write!(f, "SSD"),
            DiskClass::NVMe => write!(f, "NVMe"),
        }
    }
}

impl FromStr for DiskClass {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HDD" => Ok(DiskClass::Hdd),
            "SSD" => Ok(DiskClass::Ssd),
            "NVMe" => Ok(DiskClass::NVMe),
            other => Err(StoreError::Invalid(format!("unknown disk class {}", other))),
        }
    }
}

/// Node set a volume or a group is pinned to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityTopology {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
}

impl AccessibilityTopology {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.zones.is_empty() && self.regions.is_empty()
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("Conflict on {kind} {key}: resource version {given} is stale, current is {current}")]
    Conflict {
        kind: String,
        key: String,
        given: u64,
        current: u64,
    },

    #[error("Invalid object: {0}")]
    Invalid(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(kind: &str, key: &ObjectKey) -> Self {
        StoreError::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
