use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::filter::Filterable;
use crate::metadata::ObjectMeta;
use crate::object::{impl_resource, state_enum};
use crate::disk::LocalDiskClaimSpec;
use crate::{DiskClass, VolumeKind};

/// Storage view of one cluster node, owned by the agent running there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageNode {
    pub metadata: ObjectMeta,
    pub spec: LocalStorageNodeSpec,
    #[serde(default)]
    pub status: LocalStorageNodeStatus,
}

impl_resource!(LocalStorageNode, "LocalStorageNode");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageNodeSpec {
    pub hostname: String,
    #[serde(rename = "storageIP")]
    pub storage_ip: String,
    #[serde(default)]
    pub topology: Topology,
    #[serde(default)]
    pub volume_kinds: Vec<VolumeKind>,
    #[serde(default)]
    pub ram_disk_total_capacity: i64,
}

impl LocalStorageNodeSpec {
    /// Nodes that do not list their kinds only serve LVM volumes.
    pub fn allows_kind(&self, kind: VolumeKind) -> bool {
        if self.volume_kinds.is_empty() {
            return kind == VolumeKind::Lvm;
        }
        self.volume_kinds.contains(&kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub region: String,
}

state_enum! {
    NodeState default Empty {
        Empty => "",
        Ready => "Ready",
        Maintain => "Maintain",
        Offline => "Offline",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageNodeStatus {
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub pools: BTreeMap<String, LocalPool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StorageNodeCondition>,
    /// Disk claims whose disks were folded into each pool.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pool_extend_records: BTreeMap<String, Vec<LocalDiskClaimSpec>>,
}

impl LocalStorageNodeStatus {
    /// Replaces the condition of the same type, or appends it.
    pub fn set_condition(&mut self, condition: StorageNodeCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    pub fn condition(&self, condition_type: NodeConditionType) -> Option<&StorageNodeCondition> {
        self.conditions.iter().find(|c| c.condition_type == condition_type)
    }
}

state_enum! {
    NodeConditionType default StorageAvailable {
        StorageExpandSuccess => "ExpandSuccess",
        StorageExpandFailure => "ExpandFailure",
        StorageAvailable => "Available",
        StorageUnAvailable => "UnAvailable",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageNodeCondition {
    #[serde(rename = "type")]
    pub condition_type: NodeConditionType,
    pub status: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_update_time: DateTime<Utc>,
}

impl StorageNodeCondition {
    pub fn new(condition_type: NodeConditionType, reason: &str, message: impl Into<String>) -> Self {
        Self {
            condition_type,
            status: true,
            reason: reason.to_string(),
            message: message.into(),
            last_update_time: Utc::now(),
        }
    }
}

state_enum! {
    PoolType default Regular {
        Regular => "REGULAR",
        Thin => "THIN",
    }
}

/// Per-node summary of one storage pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPool {
    pub name: String,
    pub class: DiskClass,
    #[serde(rename = "type", default)]
    pub pool_type: PoolType,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub total_capacity_bytes: i64,
    #[serde(default)]
    pub used_capacity_bytes: i64,
    #[serde(default)]
    pub free_capacity_bytes: i64,
    #[serde(default)]
    pub volume_capacity_bytes_limit: i64,
    #[serde(default)]
    pub total_volume_count: i64,
    #[serde(default)]
    pub used_volume_count: i64,
    #[serde(default)]
    pub free_volume_count: i64,
    #[serde(default)]
    pub disks: Vec<LocalDevice>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin_pool: Option<ThinPoolInfo>,
}

state_enum! {
    DeviceState default Online {
        InUse => "InUse",
        Offline => "Offline",
        Online => "Online",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDevice {
    pub dev_path: String,
    pub class: DiskClass,
    pub capacity_bytes: i64,
    #[serde(default)]
    pub state: DeviceState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinPoolInfo {
    pub name: String,
    pub size_bytes: i64,
    #[serde(default)]
    pub used_bytes: i64,
    #[serde(default)]
    pub metadata_size_bytes: i64,
    #[serde(default)]
    pub metadata_used_bytes: i64,
}

impl Filterable for LocalStorageNode {
    fn state_name(&self) -> Option<String> {
        Some(self.status.state.to_string())
    }

    fn node_name(&self) -> Option<&str> {
        Some(&self.metadata.name)
    }
}

/// Disk inventory summary of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskNode {
    pub metadata: ObjectMeta,
    pub spec: LocalDiskNodeSpec,
    #[serde(default)]
    pub status: LocalDiskNodeStatus,
}

impl_resource!(LocalDiskNode, "LocalDiskNode");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskNodeSpec {
    pub attach_node: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskNodeStatus {
    #[serde(default)]
    pub total_disk: i64,
    #[serde(default)]
    pub allocatable_disk: i64,
}
