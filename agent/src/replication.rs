use apis::{HaState, LocalVolumeReplica, VolumeConfig};
use async_trait::async_trait;

use crate::Result;

/// Drives the block-level replication module for HA replicas.
#[async_trait]
pub trait ReplicationExecutor: Send + Sync {
    /// Installs or updates the replication resource of the replica so that it
    /// matches `config`. Safe to repeat.
    async fn apply_config(&self, replica: &LocalVolumeReplica, config: &VolumeConfig) -> Result<()>;

    /// Marks the local copy as the authoritative one. Only the primary calls this.
    async fn initialize(&self, replica: &LocalVolumeReplica, config: &VolumeConfig) -> Result<()>;

    async fn delete_config(&self, replica: &LocalVolumeReplica) -> Result<()>;

    async fn ha_state(&self, replica: &LocalVolumeReplica) -> Result<HaState>;
}
