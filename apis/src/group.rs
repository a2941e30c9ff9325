use serde::{Deserialize, Serialize};

use crate::metadata::ObjectMeta;
use crate::object::impl_resource;
use crate::AccessibilityTopology;

/// Volumes that back one workload and therefore live on the same nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeGroup {
    pub metadata: ObjectMeta,
    pub spec: LocalVolumeGroupSpec,
}

impl_resource!(LocalVolumeGroup, "LocalVolumeGroup");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeGroupSpec {
    pub namespace: String,
    #[serde(default)]
    pub accessibility: AccessibilityTopology,
    #[serde(default)]
    pub volumes: Vec<VolumeInfo>,
    #[serde(default)]
    pub pods: Vec<String>,
}

/// A group member, known by its claim, its volume, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    #[serde(default, rename = "persistentVolumeClaimName", skip_serializing_if = "String::is_empty")]
    pub pvc_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_volume_name: String,
}

impl VolumeInfo {
    pub fn is_empty(&self) -> bool {
        self.pvc_name.is_empty() && self.local_volume_name.is_empty()
    }
}

impl LocalVolumeGroup {
    pub fn has_pvc(&self, pvc: &str) -> bool {
        self.spec.volumes.iter().any(|v| v.pvc_name == pvc)
    }

    pub fn has_volume(&self, lv: &str) -> bool {
        self.spec.volumes.iter().any(|v| v.local_volume_name == lv)
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.spec
            .volumes
            .iter()
            .filter(|v| !v.local_volume_name.is_empty())
            .map(|v| v.local_volume_name.clone())
            .collect()
    }
}
