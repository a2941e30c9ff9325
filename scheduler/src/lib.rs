mod resources;
mod scheduler;

pub use resources::{PoolTally, StorageCollection};
pub use scheduler::Scheduler;

use apis::VolumeKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub max_ha_volume_count: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_ha_volume_count: apis::DEFAULT_MAX_HA_VOLUME_COUNT,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Storage node {0} not exists")]
    NodeNotFound(String),

    #[error("Node {node} does not serve {kind} volumes")]
    KindNotAllowed { node: String, kind: VolumeKind },

    #[error("Not enough capacity in pool {pool} on node {node}: required {required}, free {free}")]
    NotEnoughCapacity {
        node: String,
        pool: String,
        required: i64,
        free: i64,
    },

    #[error("Not enough free volume count in pool {pool} on node {node}")]
    NotEnoughVolumeCount { node: String, pool: String },

    #[error("Volume of {required} bytes exceeds the per-volume limit {limit} of pool {pool} on node {node}")]
    VolumeTooLarge {
        node: String,
        pool: String,
        required: i64,
        limit: i64,
    },

    #[error("Not enough nodes: need {needed}, found {found}")]
    NotEnoughNodes { needed: usize, found: usize },

    #[error("Max volumes exceeded: no free resource ID")]
    MaxVolumesExceeded,

    #[error("Scheduler not initialized")]
    NotInitialized,
}
