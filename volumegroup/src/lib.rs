mod index;
mod manager;

pub use index::GroupIndex;
pub use manager::VolumeGroupManager;

use coordination::QueueConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub queue: QueueConfig,
}

pub type Result<T> = std::result::Result<T, GroupError>;

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("Store error: {0}")]
    Store(#[from] apis::StoreError),

    #[error("Volume {volume} matches no claim of group {group}")]
    NoMatchingClaim { volume: String, group: String },

    #[error("Inconsistent node accessibility in group {0}")]
    InconsistentAccessibility(String),

    #[error("Group {0} still has volumes")]
    VolumesNotEmpty(String),
}
