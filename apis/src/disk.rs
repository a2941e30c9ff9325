use serde::{Deserialize, Serialize};

use crate::filter::Filterable;
use crate::metadata::ObjectMeta;
use crate::object::{impl_resource, state_enum};
use crate::DiskClass;

/// One block device on a node, as reported by disk discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDisk {
    pub metadata: ObjectMeta,
    pub spec: LocalDiskSpec,
    #[serde(default)]
    pub status: LocalDiskStatus,
}

impl_resource!(LocalDisk, "LocalDisk");

state_enum! {
    LocalDiskState default Unknown {
        Active => "Active",
        Inactive => "Inactive",
        Unknown => "Unknown",
    }
}

state_enum! {
    DiskClaimState default Unclaimed {
        Unclaimed => "Unclaimed",
        Claimed => "Claimed",
        Released => "Released",
        InUse => "Inuse",
        Reserved => "Reserved",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskSpec {
    pub node_name: String,
    pub dev_path: String,
    pub capacity: i64,
    #[serde(default)]
    pub has_partition: bool,
    #[serde(default)]
    pub has_raid: bool,
    #[serde(default)]
    pub has_smart_info: bool,
    #[serde(default)]
    pub filesystem: String,
    #[serde(default)]
    pub disk_attributes: DiskAttributes,
    #[serde(default)]
    pub state: LocalDiskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<String>,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub major: String,
    #[serde(default)]
    pub minor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskAttributes {
    #[serde(rename = "type", default)]
    pub disk_type: DiskClass,
    #[serde(default)]
    pub dev_type: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskStatus {
    #[serde(default)]
    pub claim_state: DiskClaimState,
}

impl LocalDisk {
    /// A disk the agent may fold into a pool: claimed for it, online, blank
    /// and addressed by a device node.
    pub fn is_consumable(&self) -> bool {
        self.spec.state == LocalDiskState::Active
            && self.status.claim_state == DiskClaimState::Claimed
            && !self.spec.has_partition
            && self.spec.filesystem.is_empty()
            && self.spec.dev_path.starts_with("/dev/")
    }

    pub fn is_allocatable(&self) -> bool {
        self.status.claim_state == DiskClaimState::Unclaimed
            && !self.spec.reserved
            && !self.spec.has_partition
    }
}

impl Filterable for LocalDisk {
    fn state_name(&self) -> Option<String> {
        Some(self.status.claim_state.to_string())
    }

    fn node_name(&self) -> Option<&str> {
        Some(&self.spec.node_name)
    }

    fn class(&self) -> Option<String> {
        Some(self.spec.disk_attributes.disk_type.to_string())
    }
}

/// Request for disks of one class on one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskClaim {
    pub metadata: ObjectMeta,
    pub spec: LocalDiskClaimSpec,
    #[serde(default)]
    pub status: LocalDiskClaimStatus,
}

impl_resource!(LocalDiskClaim, "LocalDiskClaim");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskClaimSpec {
    pub node_name: String,
    pub description: DiskClaimDescription,
    #[serde(default)]
    pub disk_refs: Vec<String>,
    #[serde(default)]
    pub owner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskClaimDescription {
    #[serde(default)]
    pub disk_type: DiskClass,
    #[serde(default)]
    pub capacity: i64,
    /// Restricts the claim to these device paths when not empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_paths: Vec<String>,
}

state_enum! {
    DiskClaimStatus default Empty {
        Empty => "",
        Pending => "Pending",
        Extending => "Extending",
        #[serde(alias = "ToBeConsumed")]
        Bound => "Bound",
        Consumed => "Consumed",
        ToBeDeleted => "ToBeDeleted",
        Deleted => "Deleted",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskClaimStatus {
    #[serde(default)]
    pub status: DiskClaimStatus,
}

impl Filterable for LocalDiskClaim {
    fn state_name(&self) -> Option<String> {
        Some(self.status.status.to_string())
    }

    fn node_name(&self) -> Option<&str> {
        Some(&self.spec.node_name)
    }

    fn class(&self) -> Option<String> {
        Some(self.spec.description.disk_type.to_string())
    }
}
