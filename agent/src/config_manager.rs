use apis::{Api, HaState, LocalVolume, LocalVolumeReplica, ReplicaState, VolumeConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::replication::ReplicationExecutor;
use crate::Result;

/// Device path an HA replica is exposed under.
pub fn ha_device_path(pool: &str, volume: &str) -> String {
    format!("/dev/{}-HA/{}", pool, volume)
}

/// Keeps the replication layer of local replicas in line with their volume
/// config. Non-HA replicas use their backing directly.
pub struct ConfigManager {
    hostname: String,
    replication: Arc<dyn ReplicationExecutor>,
    volumes: Api<LocalVolume>,
    /// replica name -> last config applied on this node
    applied: Mutex<HashMap<String, VolumeConfig>>,
}

impl ConfigManager {
    pub fn new(hostname: &str, replication: Arc<dyn ReplicationExecutor>, volumes: Api<LocalVolume>) -> Self {
        Self {
            hostname: hostname.to_string(),
            replication,
            volumes,
            applied: Mutex::new(HashMap::new()),
        }
    }

    fn is_primary(&self, config: &VolumeConfig) -> bool {
        config.replica_on(&self.hostname).map_or(false, |r| r.primary)
    }

    /// Installs the replication resource of an HA replica, or tears it down
    /// when the volume is no longer HA. Updates the replica's device path.
    pub async fn ensure_config(&self, replica: &mut LocalVolumeReplica, config: &VolumeConfig) -> Result<()> {
        let name = replica.metadata.name.clone();

        if !config.is_ha() {
            let was_ha = self.applied.lock().await.contains_key(&name)
                || (!replica.status.device_path.is_empty()
                    && replica.status.device_path != replica.status.storage_path);
            if was_ha {
                info!(replica = %name, "Volume is no longer HA, removing replication config");
                self.replication.delete_config(replica).await?;
                self.applied.lock().await.remove(&name);
            }
            replica.status.device_path = replica.status.storage_path.clone();
            replica.status.ha_state = None;
            return Ok(());
        }

        replica.status.device_path = ha_device_path(&replica.spec.pool_name, &replica.spec.volume_name);

        let up_to_date = self
            .applied
            .lock()
            .await
            .get(&name)
            .map_or(false, |applied| applied.same_layout(config));
        if !up_to_date {
            self.replication.apply_config(replica, config).await?;
            self.applied.lock().await.insert(name.clone(), config.clone());
        }

        if !config.initialized && config.ready_to_initialize && self.is_primary(config) {
            info!(replica = %name, "Initializing replicated volume on primary");
            self.replication.initialize(replica, config).await?;
            self.volumes
                .patch(
                    &replica.spec.volume_name,
                    &json!({"spec": {"config": {"initialized": true}}}),
                )
                .await?;
        }
        Ok(())
    }

    /// Sets `synced` and the HA state. An HA replica is Ready only while its
    /// copy is consistent.
    pub async fn test_config(&self, replica: &mut LocalVolumeReplica, config: &VolumeConfig) -> Result<()> {
        if !config.is_ha() {
            replica.status.synced = true;
            return Ok(());
        }
        let state = self.replication.ha_state(replica).await?;
        debug!(replica = %replica.metadata.name, ha_state = %state, "Tested replication state");
        replica.status.ha_state = Some(state);
        replica.status.synced = state == HaState::Consistent;
        replica.status.state = if replica.status.synced {
            ReplicaState::Ready
        } else {
            ReplicaState::NotReady
        };
        Ok(())
    }

    /// Removes the replication resource, if this replica ever had one.
    pub async fn delete_config(&self, replica: &LocalVolumeReplica) -> Result<()> {
        let applied = self.applied.lock().await.remove(&replica.metadata.name).is_some();
        let has_ha_device = !replica.status.device_path.is_empty()
            && replica.status.device_path != replica.status.storage_path;
        if applied || has_ha_device {
            self.replication.delete_config(replica).await?;
        }
        Ok(())
    }
}
