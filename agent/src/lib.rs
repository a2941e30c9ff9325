mod executor;
mod lvm;
mod replication;
mod drbd;
mod registry;
mod config_manager;
mod agent;
mod replica;
mod volume;
mod disk;
mod qos;

pub use executor::{Executors, HostVolume, PoolExecutor, VolumeExecutor};
pub use lvm::LvmExecutor;
pub use replication::ReplicationExecutor;
pub use drbd::{render_resource, DrbdExecutor};
pub use registry::Registry;
pub use config_manager::{ha_device_path, ConfigManager};
pub use agent::{resolve_storage_ip, NodeAgent};
pub use qos::{device_numbers, CgroupQos, IoLimits, QosExecutor, DEFAULT_CGROUP_ROOT};

use apis::VolumeKind;
use coordination::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_name: String,
    pub namespace: String,
    /// Cluster-node annotation that carries the storage IP, if any.
    pub storage_ip_annotation_key: Option<String>,
    pub queue: QueueConfig,
    pub heartbeat_period_ms: u64,
    pub heartbeat_duration_ms: u64,
    pub drbd: DrbdConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            namespace: String::new(),
            storage_ip_annotation_key: None,
            queue: QueueConfig::default(),
            heartbeat_period_ms: 5_000,
            heartbeat_duration_ms: 15_000,
            drbd: DrbdConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrbdConfig {
    pub start_port: i32,
    pub config_dir: PathBuf,
}

impl Default for DrbdConfig {
    fn default() -> Self {
        Self {
            start_port: 43001,
            config_dir: PathBuf::from("/etc/drbd.d"),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Store error: {0}")]
    Store(#[from] apis::StoreError),

    #[error("System error: {0}")]
    System(#[from] system::SystemError),

    #[error("Election error: {0}")]
    Election(#[from] coordination::ElectionError),

    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Storage pool {0} not found on this node")]
    PoolNotFound(String),

    #[error("No executor for {0} volumes")]
    KindNotSupported(VolumeKind),

    #[error("Volume {0} not found on host")]
    VolumeNotFound(String),

    #[error("Volume {0} still has snapshots")]
    SnapshotsExist(String),

    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
