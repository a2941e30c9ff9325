use apis::{Topology, VolumeKind};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::quantity::parse_bytes;
use crate::{Result, SystemError};

/// Cluster-node annotation carrying the storage settings of that node.
pub const NODE_CONFIG_ANNOTATION: &str = "localstorage.hwameistor.io/local-storage-conf";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeAnnotationConfig {
    #[serde(default, rename = "storageIP")]
    pub storage_ip: String,
    #[serde(default)]
    pub topology: Option<Topology>,
    #[serde(default)]
    pub local_storage_config: Option<LocalStorageConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocalStorageConfig {
    #[serde(default)]
    pub volume_kind: VolumeKind,
    #[serde(default = "zero_capacity")]
    pub ram_disk_total_capacity: String,
}

fn zero_capacity() -> String {
    "0".to_string()
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            volume_kind: VolumeKind::Lvm,
            ram_disk_total_capacity: zero_capacity(),
        }
    }
}

impl NodeAnnotationConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        let config: NodeAnnotationConfig = serde_json::from_str(raw)
            .map_err(|e| SystemError::NodeConfig(format!("{}: {}", NODE_CONFIG_ANNOTATION, e)))?;
        if !config.storage_ip.is_empty() && config.storage_ip.parse::<Ipv4Addr>().is_err() {
            return Err(SystemError::NodeConfig(format!(
                "storageIP {:?} is not an IPv4 address",
                config.storage_ip
            )));
        }
        config.ram_disk_total_capacity_bytes()?;
        Ok(config)
    }

    pub fn volume_kind(&self) -> VolumeKind {
        self.local_storage_config
            .as_ref()
            .map(|c| c.volume_kind)
            .unwrap_or_default()
    }

    pub fn ram_disk_total_capacity_bytes(&self) -> Result<i64> {
        match &self.local_storage_config {
            Some(c) if !c.ram_disk_total_capacity.is_empty() => parse_bytes(&c.ram_disk_total_capacity),
            _ => Ok(0),
        }
    }
}
