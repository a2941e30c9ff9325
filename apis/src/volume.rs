use serde::{Deserialize, Serialize};

use crate::filter::Filterable;
use crate::metadata::ObjectMeta;
use crate::object::{impl_resource, state_enum};
use crate::{AccessibilityTopology, DiskClass, VolumeKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolume {
    pub metadata: ObjectMeta,
    pub spec: LocalVolumeSpec,
    #[serde(default)]
    pub status: LocalVolumeStatus,
}

impl_resource!(LocalVolume, "LocalVolume");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeSpec {
    pub pool_name: String,
    pub required_capacity_bytes: i64,
    #[serde(default)]
    pub replica_number: i64,
    #[serde(default)]
    pub convertible: bool,
    #[serde(default)]
    pub volume_group: String,
    #[serde(default)]
    pub persistent_volume_claim_namespace: String,
    #[serde(default)]
    pub persistent_volume_claim_name: String,
    #[serde(default)]
    pub accessibility: AccessibilityTopology,
    #[serde(default)]
    pub volume_kind: VolumeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<VolumeConfig>,
    #[serde(default, rename = "volumeQoS", skip_serializing_if = "VolumeQoS::is_empty")]
    pub volume_qos: VolumeQoS,
    #[serde(default)]
    pub delete: bool,
}

/// Block I/O limits of a volume. Both values are quantities (`"100Mi"`,
/// `"1000"`); empty means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeQoS {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub throughput: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iops: String,
}

impl VolumeQoS {
    pub fn is_empty(&self) -> bool {
        self.throughput.is_empty() && self.iops.is_empty()
    }
}

state_enum! {
    VolumeState default Empty {
        Empty => "",
        Creating => "Creating",
        Ready => "Ready",
        NotReady => "NotReady",
        ToBeDeleted => "ToBeDeleted",
        Deleted => "Deleted",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeStatus {
    #[serde(default)]
    pub state: VolumeState,
    #[serde(default)]
    pub replicas: Vec<String>,
    #[serde(default)]
    pub published_node_name: String,
    #[serde(default, rename = "publishedFSType")]
    pub published_fs_type: String,
    #[serde(default)]
    pub published_raw_block: bool,
    #[serde(default)]
    pub allocated_capacity_bytes: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Replication layout of a volume, produced by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    pub version: i64,
    pub volume_name: String,
    pub required_capacity_bytes: i64,
    #[serde(default)]
    pub convertible: bool,
    #[serde(rename = "resourceID")]
    pub resource_id: i32,
    #[serde(default)]
    pub ready_to_initialize: bool,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub replicas: Vec<VolumeReplicaEntry>,
}

impl VolumeConfig {
    pub fn replica_on(&self, node: &str) -> Option<&VolumeReplicaEntry> {
        self.replicas.iter().find(|r| r.hostname == node)
    }

    pub fn nodes(&self) -> Vec<String> {
        self.replicas.iter().map(|r| r.hostname.clone()).collect()
    }

    pub fn is_ha(&self) -> bool {
        self.resource_id >= 0
    }

    /// Compares layout only; version bumps and initialization flags are ignored.
    pub fn same_layout(&self, other: &VolumeConfig) -> bool {
        self.volume_name == other.volume_name
            && self.required_capacity_bytes == other.required_capacity_bytes
            && self.convertible == other.convertible
            && self.resource_id == other.resource_id
            && self.replicas == other.replicas
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicaEntry {
    #[serde(rename = "id")]
    pub id: i64,
    pub hostname: String,
    #[serde(rename = "ip")]
    pub ip: String,
    #[serde(default)]
    pub primary: bool,
}

impl LocalVolume {
    /// HA volumes need a replication resource: more than one replica, or
    /// reserved for a later upgrade to more than one.
    pub fn is_ha(&self) -> bool {
        self.spec.replica_number >= 2 || self.spec.convertible
    }

    pub fn pool_class(&self) -> Option<DiskClass> {
        DiskClass::from_pool_name(&self.spec.pool_name)
    }

    pub fn config_nodes(&self) -> Vec<String> {
        self.spec.config.as_ref().map(|c| c.nodes()).unwrap_or_default()
    }

    pub fn is_published(&self) -> bool {
        !self.status.published_node_name.is_empty()
    }
}

impl Filterable for LocalVolume {
    fn state_name(&self) -> Option<String> {
        Some(self.status.state.to_string())
    }

    fn class(&self) -> Option<String> {
        self.pool_class().map(|c| c.to_string())
    }

    fn volume_group(&self) -> Option<&str> {
        Some(&self.spec.volume_group)
    }

    fn claim_namespace(&self) -> Option<&str> {
        Some(&self.spec.persistent_volume_claim_namespace)
    }
}
