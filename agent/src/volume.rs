use apis::{LocalVolume, LocalVolumeReplica, LocalVolumeReplicaSpec, ObjectMeta, ReplicaState};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::agent::NodeAgent;
use crate::Result;

const REPLICA_NAME_SUFFIX_LEN: usize = 6;

/// `<volume>-<6 random lowercase letters>`.
pub(crate) fn replica_name(volume: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .take(REPLICA_NAME_SUFFIX_LEN)
        .collect();
    format!("{}-{}", volume, suffix)
}

impl NodeAgent {
    /// Keeps this node's replica of a volume in line with the volume config.
    pub(crate) async fn process_volume(&self, name: &str) -> Result<()> {
        let volume = self.volumes.get_opt(name).await?;
        let assigned = volume.as_ref().map_or(false, |v| {
            v.spec
                .config
                .as_ref()
                .map_or(false, |c| c.replica_on(&self.config.node_name).is_some())
        });

        let replica = self.local_replica_of(name).await?;
        match (volume, replica) {
            (Some(volume), None) if assigned => self.create_local_replica(&volume).await,
            (Some(volume), Some(replica)) if assigned => self.sync_local_replica(&volume, replica).await,
            (Some(_), Some(replica)) => {
                debug!(volume = %name, replica = %replica.metadata.name, "Node no longer in volume config");
                self.mark_replica_deleting(replica).await
            }
            // A volume only goes away for good after its replicas; a live
            // one means the record is about to be recreated.
            (None, Some(replica)) => {
                warn!(volume = %name, replica = %replica.metadata.name, "Volume record missing, keeping replica");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// This node's replica of `volume`, from the records cache or the store.
    async fn local_replica_of(&self, volume: &str) -> Result<Option<LocalVolumeReplica>> {
        if let Some(name) = self.replica_of(volume).await {
            if let Some(replica) = self.replicas.get_opt(&name).await? {
                return Ok(Some(replica));
            }
        }
        let found = self
            .replicas
            .list()
            .await?
            .into_iter()
            .find(|r| r.spec.volume_name == volume && r.spec.node_name == self.config.node_name);
        if let Some(replica) = &found {
            self.replica_records
                .lock()
                .await
                .insert(volume.to_string(), replica.metadata.name.clone());
        }
        Ok(found)
    }

    async fn create_local_replica(&self, volume: &LocalVolume) -> Result<()> {
        if volume.spec.delete || volume.metadata.is_deleting() {
            return Ok(());
        }
        let name = replica_name(&volume.metadata.name);
        let replica = LocalVolumeReplica {
            metadata: ObjectMeta::named(&name),
            spec: LocalVolumeReplicaSpec {
                volume_name: volume.metadata.name.clone(),
                pool_name: volume.spec.pool_name.clone(),
                node_name: self.config.node_name.clone(),
                required_capacity_bytes: volume.spec.required_capacity_bytes,
                volume_kind: volume.spec.volume_kind,
                volume_qos: volume.spec.volume_qos.clone(),
                delete: false,
            },
            status: Default::default(),
        };
        info!(volume = %volume.metadata.name, replica = %name, "Creating replica record");
        self.replicas.create(&replica).await?;
        self.replica_records
            .lock()
            .await
            .insert(volume.metadata.name.clone(), name);
        Ok(())
    }

    async fn sync_local_replica(&self, volume: &LocalVolume, replica: LocalVolumeReplica) -> Result<()> {
        if volume.spec.delete {
            return self.mark_replica_deleting(replica).await;
        }

        let required = volume
            .spec
            .config
            .as_ref()
            .map_or(volume.spec.required_capacity_bytes, |c| c.required_capacity_bytes);
        let mut updated = replica.clone();
        if required > replica.spec.required_capacity_bytes {
            info!(
                replica = %replica.metadata.name,
                from = replica.spec.required_capacity_bytes,
                to = required,
                "Raising replica capacity"
            );
            updated.spec.required_capacity_bytes = required;
        }
        if volume.spec.volume_qos != replica.spec.volume_qos {
            info!(replica = %replica.metadata.name, qos = ?volume.spec.volume_qos, "Updating replica QoS");
            updated.spec.volume_qos = volume.spec.volume_qos.clone();
        }
        if updated.spec != replica.spec {
            self.replicas.update(&updated).await?;
            return Ok(());
        }

        self.replica_queue.add(replica.metadata.name);
        Ok(())
    }

    async fn mark_replica_deleting(&self, replica: LocalVolumeReplica) -> Result<()> {
        if replica.spec.delete || replica.status.state == ReplicaState::Deleted {
            return Ok(());
        }
        info!(replica = %replica.metadata.name, "Marking replica for deletion");
        let mut updated = replica;
        updated.spec.delete = true;
        self.replicas.update(&updated).await?;
        Ok(())
    }
}
