use coordination::QueueConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use system::{AuthConfig, Environment};

use crate::error::LocalStorageError;

/// Which components one process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    All,
    Controller,
    Agent,
    Csi,
    Dataset,
}

impl Role {
    pub fn runs_controller(self) -> bool {
        matches!(self, Role::All | Role::Controller)
    }

    pub fn runs_agent(self) -> bool {
        matches!(self, Role::All | Role::Agent)
    }

    pub fn runs_csi(self) -> bool {
        matches!(self, Role::All | Role::Csi)
    }

    pub fn runs_dataset(self) -> bool {
        matches!(self, Role::All | Role::Dataset)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::All => "all",
            Role::Controller => "controller",
            Role::Agent => "agent",
            Role::Csi => "csi",
            Role::Dataset => "dataset",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = LocalStorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Role::All),
            "controller" => Ok(Role::Controller),
            "agent" => Ok(Role::Agent),
            "csi" => Ok(Role::Csi),
            "dataset" => Ok(Role::Dataset),
            other => Err(LocalStorageError::InvalidConfig(format!("unknown role {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_name: String,
    pub namespace: String,
    pub role: Role,
    pub csi_address: String,
    pub max_ha_volume_count: i32,
    pub dataset_leader_election: bool,
    pub storage_ip_annotation_key: Option<String>,
    pub auth: AuthConfig,
    pub queue: QueueConfig,
}

impl Config {
    pub fn new(env: Environment, role: Role) -> Self {
        Self {
            node_name: env.node_name,
            namespace: env.namespace,
            role,
            csi_address: csi::Config::default().address,
            max_ha_volume_count: apis::DEFAULT_MAX_HA_VOLUME_COUNT,
            dataset_leader_election: false,
            storage_ip_annotation_key: env.storage_ip_annotation_key,
            auth: env.auth,
            queue: QueueConfig::default(),
        }
    }

    /// The node name doubles as lease identity, so every role needs it.
    pub fn validate(&self) -> Result<(), LocalStorageError> {
        if self.node_name.is_empty() {
            return Err(LocalStorageError::InvalidConfig(
                "node name is required (--node-name or NODENAME)".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(LocalStorageError::InvalidConfig(
                "namespace is required (--namespace or NAMESPACE)".to_string(),
            ));
        }
        if let Err(e) = csi::Endpoint::parse(&self.csi_address) {
            return Err(LocalStorageError::InvalidConfig(e.to_string()));
        }
        if self.max_ha_volume_count <= 0 {
            return Err(LocalStorageError::InvalidConfig(format!(
                "max HA volume count must be positive, got {}",
                self.max_ha_volume_count
            )));
        }
        Ok(())
    }
}

impl From<Config> for scheduler::Config {
    fn from(config: Config) -> Self {
        scheduler::Config {
            max_ha_volume_count: config.max_ha_volume_count,
        }
    }
}

impl From<Config> for volumegroup::Config {
    fn from(config: Config) -> Self {
        volumegroup::Config { queue: config.queue }
    }
}

impl From<Config> for controller::Config {
    fn from(config: Config) -> Self {
        controller::Config {
            identity: config.node_name.clone(),
            namespace: config.namespace.clone(),
            queue: config.queue,
            scheduler: config.into(),
            ..Default::default()
        }
    }
}

impl From<Config> for agent::Config {
    fn from(config: Config) -> Self {
        agent::Config {
            node_name: config.node_name,
            namespace: config.namespace,
            storage_ip_annotation_key: config.storage_ip_annotation_key,
            queue: config.queue,
            ..Default::default()
        }
    }
}

impl From<Config> for csi::Config {
    fn from(config: Config) -> Self {
        csi::Config {
            node_name: config.node_name,
            namespace: config.namespace,
            address: config.csi_address,
            auth: config.auth,
            ..Default::default()
        }
    }
}

impl From<Config> for dataset::Config {
    fn from(config: Config) -> Self {
        dataset::Config {
            namespace: config.namespace,
            identity: config.node_name,
            leader_election: config.dataset_leader_election,
            queue: config.queue,
            ..Default::default()
        }
    }
}
