use serde::{Deserialize, Serialize};

use crate::filter::Filterable;
use crate::metadata::ObjectMeta;
use crate::object::{impl_resource, state_enum};
use crate::{VolumeKind, VolumeQoS};

/// One on-disk copy of a volume on one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeReplica {
    pub metadata: ObjectMeta,
    pub spec: LocalVolumeReplicaSpec,
    #[serde(default)]
    pub status: LocalVolumeReplicaStatus,
}

impl_resource!(LocalVolumeReplica, "LocalVolumeReplica");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeReplicaSpec {
    pub volume_name: String,
    pub pool_name: String,
    pub node_name: String,
    pub required_capacity_bytes: i64,
    #[serde(default)]
    pub volume_kind: VolumeKind,
    #[serde(default, rename = "volumeQoS", skip_serializing_if = "VolumeQoS::is_empty")]
    pub volume_qos: VolumeQoS,
    #[serde(default)]
    pub delete: bool,
}

state_enum! {
    ReplicaState default Empty {
        Empty => "",
        Invalid => "Invalid",
        Creating => "Creating",
        Ready => "Ready",
        NotReady => "NotReady",
        ToBeDeleted => "ToBeDeleted",
        Deleted => "Deleted",
    }
}

state_enum! {
    HaState default Inconsistent {
        Consistent => "Consistent",
        Inconsistent => "Inconsistent",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeReplicaStatus {
    #[serde(default)]
    pub storage_path: String,
    #[serde(default)]
    pub device_path: String,
    #[serde(default)]
    pub disks: Vec<String>,
    #[serde(default)]
    pub allocated_capacity_bytes: i64,
    #[serde(default)]
    pub state: ReplicaState,
    #[serde(default)]
    pub synced: bool,
    #[serde(default, rename = "haState", skip_serializing_if = "Option::is_none")]
    pub ha_state: Option<HaState>,
    #[serde(default)]
    pub in_use: bool,
    /// Limits last applied to the replica's device.
    #[serde(default, rename = "appliedQoS", skip_serializing_if = "VolumeQoS::is_empty")]
    pub applied_qos: VolumeQoS,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl LocalVolumeReplica {
    pub fn is_ready_and_synced(&self) -> bool {
        self.status.state == ReplicaState::Ready && self.status.synced
    }
}

impl Filterable for LocalVolumeReplica {
    fn state_name(&self) -> Option<String> {
        Some(self.status.state.to_string())
    }

    fn node_name(&self) -> Option<&str> {
        Some(&self.spec.node_name)
    }

    fn synced(&self) -> Option<bool> {
        Some(self.status.synced)
    }
}
