use serde::{Deserialize, Serialize};

use crate::metadata::ObjectMeta;
use crate::object::{impl_resource, state_enum};
use crate::OperationState;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeSnapshot {
    pub metadata: ObjectMeta,
    pub spec: LocalVolumeSnapshotSpec,
    #[serde(default)]
    pub status: LocalVolumeSnapshotStatus,
}

impl_resource!(LocalVolumeSnapshot, "LocalVolumeSnapshot");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeSnapshotSpec {
    pub source_volume: String,
    #[serde(default)]
    pub required_capacity_bytes: i64,
    #[serde(default)]
    pub delete: bool,
}

state_enum! {
    SnapshotState default Empty {
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
pub struct LocalVolumeSnapshotStatus {
    #[serde(default)]
    pub state: SnapshotState,
    #[serde(default)]
    pub allocated_capacity_bytes: i64,
}

/// Request to roll a volume back to, or clone it from, a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeSnapshotRestore {
    pub metadata: ObjectMeta,
    pub spec: LocalVolumeSnapshotRestoreSpec,
    #[serde(default)]
    pub status: LocalVolumeSnapshotRestoreStatus,
}

impl_resource!(LocalVolumeSnapshotRestore, "LocalVolumeSnapshotRestore");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeSnapshotRestoreSpec {
    pub source_volume_snapshot: String,
    #[serde(default)]
    pub target_volume: String,
    #[serde(default)]
    pub abort: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeSnapshotRestoreStatus {
    #[serde(default)]
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}
