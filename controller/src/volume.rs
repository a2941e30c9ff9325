use apis::{
    Api, LocalVolume, LocalVolumeReplica, NodeState, ObjectKey, PersistentVolumeClaim,
    ReplicaState, VolumeState,
};
use tracing::{debug, info, warn};

use crate::manager::ControllerManager;
use crate::recovery::recreate;
use crate::Result;

impl ControllerManager {
    /// Volume state machine:
    /// Empty -> Creating -> Ready <-> NotReady -> ToBeDeleted -> Deleted.
    pub(crate) async fn process_volume(&self, name: &str) -> Result<()> {
        let Some(vol) = self.volumes.get_opt(name).await? else {
            if let Some(lost) = self.lost_volumes.take(name) {
                recreate(&self.volumes, lost).await?;
            }
            return Ok(());
        };
        debug!(volume = %name, state = %vol.status.state, "Processing volume");

        if vol.spec.delete && !matches!(vol.status.state, VolumeState::ToBeDeleted | VolumeState::Deleted) {
            return self.set_volume_state(vol, VolumeState::ToBeDeleted).await;
        }

        match vol.status.state {
            VolumeState::Empty => self.set_volume_state(vol, VolumeState::Creating).await,
            VolumeState::Creating | VolumeState::Ready | VolumeState::NotReady => {
                self.reconcile_volume(vol).await
            }
            VolumeState::ToBeDeleted => self.delete_volume(vol).await,
            VolumeState::Deleted => {
                info!(volume = %name, "Removing deleted volume record");
                self.volumes.delete_opt(name).await?;
                Ok(())
            }
        }
    }

    async fn set_volume_state(&self, mut vol: LocalVolume, state: VolumeState) -> Result<()> {
        info!(volume = %vol.metadata.name, from = %vol.status.state, to = %state, "Volume state changed");
        vol.status.state = state;
        self.volumes.update_status(&vol).await?;
        Ok(())
    }

    /// Live replicas of a volume, skipping those being removed.
    pub(crate) async fn volume_replicas(&self, volume: &str) -> Result<Vec<LocalVolumeReplica>> {
        Ok(self
            .replicas
            .list()
            .await?
            .into_iter()
            .filter(|r| r.spec.volume_name == volume)
            .filter(|r| !r.spec.delete && !matches!(r.status.state, ReplicaState::ToBeDeleted | ReplicaState::Deleted))
            .collect())
    }

    async fn reconcile_volume(&self, mut vol: LocalVolume) -> Result<()> {
        let name = vol.metadata.name.clone();

        let placed = vol.spec.config.as_ref().map_or(0, |c| c.replicas.len() as i64);
        let config_capacity = vol.spec.config.as_ref().map_or(0, |c| c.required_capacity_bytes);
        if placed < vol.spec.replica_number || config_capacity < vol.spec.required_capacity_bytes {
            let config = self.scheduler.allocate(&vol)?;
            info!(volume = %name, version = config.version, nodes = ?config.nodes(), "Volume scheduled");
            vol.spec.config = Some(config);
            self.volumes.update(&vol).await?;
            return Ok(());
        }
        if let Some(config) = self.scheduler.reassign_resource_id(&vol)? {
            vol.spec.config = Some(config);
            self.volumes.update(&vol).await?;
            return Ok(());
        }

        let replicas = self.volume_replicas(&name).await?;
        let Some(config) = vol.spec.config.clone() else {
            return Ok(());
        };

        if config.is_ha() && !config.ready_to_initialize {
            let all_created = config
                .replicas
                .iter()
                .all(|entry| replicas.iter().any(|r| r.spec.node_name == entry.hostname));
            if all_created {
                info!(volume = %name, "All replicas created, ready to initialize");
                let mut config = config.clone();
                config.ready_to_initialize = true;
                vol.spec.config = Some(config);
                self.volumes.update(&vol).await?;
                return Ok(());
            }
        }

        let on_config: Vec<&LocalVolumeReplica> = replicas
            .iter()
            .filter(|r| config.replica_on(&r.spec.node_name).is_some())
            .collect();
        let all_ready = on_config.len() == config.replicas.len()
            && on_config.len() as i64 >= vol.spec.replica_number
            && on_config.iter().all(|r| r.is_ready_and_synced());

        let mut published_ok = true;
        if vol.is_published() {
            let node = self.nodes.get_opt(&vol.status.published_node_name).await?;
            if node.map_or(true, |n| n.status.state != NodeState::Ready) {
                warn!(volume = %name, node = %vol.status.published_node_name, "Published node is not available");
                published_ok = false;
            }
        }

        let mut updated = vol.clone();
        let mut names: Vec<String> = on_config.iter().map(|r| r.metadata.name.clone()).collect();
        names.sort();
        updated.status.replicas = names;
        if let Some(min) = on_config.iter().map(|r| r.status.allocated_capacity_bytes).min() {
            if all_ready {
                updated.status.allocated_capacity_bytes = min;
            }
        }
        updated.status.state = match (vol.status.state, all_ready && published_ok) {
            (_, true) => VolumeState::Ready,
            (VolumeState::Creating, false) => VolumeState::Creating,
            (_, false) => VolumeState::NotReady,
        };

        if updated.status != vol.status {
            if updated.status.state != vol.status.state {
                info!(volume = %name, from = %vol.status.state, to = %updated.status.state, "Volume state changed");
            }
            self.volumes.update_status(&updated).await?;
        }
        Ok(())
    }

    /// Replicas are removed by their node agents; the volume is Deleted once
    /// none is left.
    async fn delete_volume(&self, vol: LocalVolume) -> Result<()> {
        let name = &vol.metadata.name;
        let remaining: Vec<LocalVolumeReplica> = self
            .replicas
            .list()
            .await?
            .into_iter()
            .filter(|r| &r.spec.volume_name == name)
            .collect();
        if !remaining.is_empty() {
            debug!(volume = %name, "Waiting for {} replicas to be removed", remaining.len());
            for replica in remaining {
                if !replica.spec.delete {
                    let mut replica = replica;
                    replica.spec.delete = true;
                    self.replicas.update(&replica).await?;
                }
            }
            return Ok(());
        }
        self.set_volume_state(vol, VolumeState::Deleted).await
    }

    /// A deleted claim takes its volumes with it.
    pub(crate) async fn process_claim_removal(&self, key: &ObjectKey) -> Result<()> {
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.pvcs.store(), &key.namespace);
        if pvcs.get_opt(&key.name).await?.is_some() {
            return Ok(());
        }
        for vol in self.volumes.list().await? {
            if vol.spec.persistent_volume_claim_namespace != key.namespace
                || vol.spec.persistent_volume_claim_name != key.name
                || vol.spec.delete
            {
                continue;
            }
            info!(volume = %vol.metadata.name, claim = %key, "Claim removed, deleting volume");
            let mut vol = vol;
            vol.spec.delete = true;
            self.volumes.update(&vol).await?;
        }
        Ok(())
    }
}
