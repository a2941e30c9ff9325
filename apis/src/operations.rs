use serde::{Deserialize, Serialize};

use crate::metadata::ObjectMeta;
use crate::object::{impl_resource, state_enum};

state_enum! {
    /// Phase shared by the expand, convert and migrate operations.
    OperationState default Empty {
        Empty => "",
        Submitted => "Submitted",
        InProgress => "InProgress",
        Completed => "Completed",
        ToBeAborted => "ToBeAborted",
        Aborted => "Aborted",
        Failed => "Failed",
    }
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Aborted | OperationState::Failed
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeExpand {
    pub metadata: ObjectMeta,
    pub spec: LocalVolumeExpandSpec,
    #[serde(default)]
    pub status: LocalVolumeExpandStatus,
}

impl_resource!(LocalVolumeExpand, "LocalVolumeExpand");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeExpandSpec {
    pub volume_name: String,
    pub required_capacity_bytes: i64,
    #[serde(default)]
    pub abort: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeExpandStatus {
    #[serde(default)]
    pub state: OperationState,
    #[serde(default)]
    pub allocated_capacity_bytes: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeConvert {
    pub metadata: ObjectMeta,
    pub spec: LocalVolumeConvertSpec,
    #[serde(default)]
    pub status: LocalVolumeConvertStatus,
}

impl_resource!(LocalVolumeConvert, "LocalVolumeConvert");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeConvertSpec {
    pub volume_name: String,
    pub replica_number: i64,
    #[serde(default)]
    pub abort: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeConvertStatus {
    #[serde(default)]
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeMigrate {
    pub metadata: ObjectMeta,
    pub spec: LocalVolumeMigrateSpec,
    #[serde(default)]
    pub status: LocalVolumeMigrateStatus,
}

impl_resource!(LocalVolumeMigrate, "LocalVolumeMigrate");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeMigrateSpec {
    pub volume_name: String,
    pub source_node: String,
    /// Candidate destinations; the scheduler picks among them, or anywhere when empty.
    #[serde(default)]
    pub target_nodes_suggested: Vec<String>,
    /// Moves every member of the volume's group together.
    #[serde(default)]
    pub migrate_all_vols: bool,
    #[serde(default)]
    pub abort: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeMigrateStatus {
    #[serde(default)]
    pub state: OperationState,
    #[serde(default)]
    pub original_replica_number: i64,
    #[serde(default)]
    pub target_node: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}
