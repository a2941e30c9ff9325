//! Pre-provisions an acceleration volume for every external dataset.

mod manager;
mod dataset;
mod volume;

pub use manager::DatasetManager;
pub use dataset::{dataset_volume, is_dataset_volume};

use apis::{DiskClass, GIB};
use coordination::QueueConfig;
use serde::{Deserialize, Serialize};

pub const DATASET_LEASE_NAME: &str = "hwameistor-dataset-manager";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub namespace: String,
    /// Identity used in the lease when leader election is on.
    pub identity: String,
    pub leader_election: bool,
    pub lease_duration_ms: u64,
    pub renew_deadline_ms: u64,
    pub retry_period_ms: u64,
    pub queue: QueueConfig,
    pub capacity_bytes: i64,
    pub pool_class: DiskClass,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            identity: String::new(),
            leader_election: false,
            lease_duration_ms: 15_000,
            renew_deadline_ms: 10_000,
            retry_period_ms: 2_000,
            queue: QueueConfig::default(),
            capacity_bytes: GIB,
            pool_class: DiskClass::Hdd,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Store error: {0}")]
    Store(#[from] apis::StoreError),

    #[error("Election error: {0}")]
    Election(#[from] coordination::ElectionError),
}
