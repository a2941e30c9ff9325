mod manager;
mod recovery;
mod volume;
mod expand;
mod migrate;
mod convert;
mod diskclaim;
mod node;
mod snapshot;

pub use manager::ControllerManager;
pub use expand::expand_capacity_needed;

use coordination::QueueConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity used in the leader lease.
    pub identity: String,
    pub namespace: String,
    pub lease_duration_ms: u64,
    pub renew_deadline_ms: u64,
    pub retry_period_ms: u64,
    pub queue: QueueConfig,
    /// How often storage node states are checked against their heartbeats.
    pub node_sync_period_ms: u64,
    pub scheduler: scheduler::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: String::new(),
            namespace: String::new(),
            lease_duration_ms: 15_000,
            renew_deadline_ms: 10_000,
            retry_period_ms: 2_000,
            queue: QueueConfig::default(),
            node_sync_period_ms: 20_000,
            scheduler: scheduler::Config::default(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Store error: {0}")]
    Store(#[from] apis::StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("Election error: {0}")]
    Election(#[from] coordination::ElectionError),

    #[error("Volume group error: {0}")]
    Group(#[from] volumegroup::GroupError),

    #[error("Volume {0} not found")]
    VolumeNotFound(String),

    #[error("Not enough capacity on node {node}: required {required}, free {free}")]
    NotEnoughCapacity { node: String, required: i64, free: i64 },

    #[error("No available disk for claim {0}")]
    NoAvailableDisk(String),

    #[error("No target node for migrating volume {0}")]
    NoMigrationTarget(String),
}
