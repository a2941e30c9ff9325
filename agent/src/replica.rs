use apis::{
    LocalVolumeReplica, ReplicaState, VolumeKind, VOLUME_EXPANSION_CAPACITY_BYTES_MIN,
};
use tracing::{debug, info, warn};

use crate::agent::NodeAgent;
use crate::qos::IoLimits;
use crate::{AgentError, Result};

impl NodeAgent {
    /// Drives one local replica through its lifecycle:
    /// Empty -> Creating -> NotReady <-> Ready -> ToBeDeleted -> Deleted.
    pub(crate) async fn process_replica(&self, name: &str) -> Result<()> {
        let Some(replica) = self.replicas.get_opt(name).await? else {
            return self.recover_replica(name).await;
        };
        if replica.spec.node_name != self.config.node_name {
            return Ok(());
        }
        self.forget_tombstone(name);
        self.replica_records
            .lock()
            .await
            .insert(replica.spec.volume_name.clone(), name.to_string());

        debug!(replica = %name, state = %replica.status.state, "Processing replica");

        if replica.spec.delete
            && !matches!(replica.status.state, ReplicaState::ToBeDeleted | ReplicaState::Deleted)
        {
            let mut updated = replica.clone();
            updated.status.state = ReplicaState::ToBeDeleted;
            return self.write_replica_status(&replica, &updated).await;
        }

        match replica.status.state {
            ReplicaState::Empty => self.validate_replica(replica).await,
            ReplicaState::Invalid => Ok(()),
            ReplicaState::Creating => self.create_replica(replica).await,
            ReplicaState::Ready | ReplicaState::NotReady => self.sync_replica(replica).await,
            ReplicaState::ToBeDeleted => self.delete_replica(replica).await,
            ReplicaState::Deleted => self.cleanup_replica(replica).await,
        }
    }

    /// Empty replicas move on only when this node serves their kind.
    async fn validate_replica(&self, replica: LocalVolumeReplica) -> Result<()> {
        let kind = replica.spec.volume_kind;
        let node = self
            .nodes
            .get_opt(&self.config.node_name)
            .await?
            .ok_or_else(|| AgentError::NodeNotFound(self.config.node_name.clone()))?;

        let mut updated = replica.clone();
        if !node.spec.allows_kind(kind) || self.executors.volume_executor(kind).is_none() {
            warn!(replica = %replica.metadata.name, kind = %kind, "Volume kind not served by this node");
            updated.status.state = ReplicaState::Invalid;
            updated.status.message = AgentError::KindNotSupported(kind).to_string();
        } else {
            updated.status.state = ReplicaState::Creating;
        }
        self.write_replica_status(&replica, &updated).await
    }

    async fn create_replica(&self, replica: LocalVolumeReplica) -> Result<()> {
        let kind = replica.spec.volume_kind;
        let executor = self
            .executors
            .volume_executor(kind)
            .ok_or(AgentError::KindNotSupported(kind))?;

        info!(replica = %replica.metadata.name, pool = %replica.spec.pool_name, "Creating volume replica");
        let mut updated = replica.clone();
        updated.status = executor.create_volume_replica(&replica).await?;
        updated.status.state = ReplicaState::NotReady;
        updated.status.message.clear();
        self.write_replica_status(&replica, &updated).await
    }

    async fn sync_replica(&self, replica: LocalVolumeReplica) -> Result<()> {
        let kind = replica.spec.volume_kind;
        let executor = self
            .executors
            .volume_executor(kind)
            .ok_or(AgentError::KindNotSupported(kind))?;
        let name = replica.metadata.name.clone();

        let mut updated = replica.clone();
        let shortfall = replica.spec.required_capacity_bytes - replica.status.allocated_capacity_bytes;
        // NotReady replicas grow too; they may be waiting on the shortfall itself.
        if kind == VolumeKind::Lvm && shortfall > VOLUME_EXPANSION_CAPACITY_BYTES_MIN {
            info!(replica = %name, required = replica.spec.required_capacity_bytes, "Expanding volume replica");
            updated.status = executor
                .expand_volume_replica(&replica, replica.spec.required_capacity_bytes)
                .await?;
            updated.status.state = ReplicaState::NotReady;
            self.write_replica_status(&replica, &updated).await?;
            return self.registry.update_for_replica(&updated).await;
        }

        let Some(volume) = self.volumes.get_opt(&replica.spec.volume_name).await? else {
            warn!(replica = %name, volume = %replica.spec.volume_name, "Volume of replica not found");
            return Ok(());
        };

        updated.status = executor.test_volume_replica(&replica).await?;
        updated.status.applied_qos = replica.status.applied_qos.clone();
        match &volume.spec.config {
            Some(config) => {
                if let Err(e) = self.config_manager.ensure_config(&mut updated, config).await {
                    updated.status.state = ReplicaState::NotReady;
                    updated.status.message = e.to_string();
                    self.write_replica_status(&replica, &updated).await?;
                    return Err(e);
                }
                self.config_manager.test_config(&mut updated, config).await?;
            }
            None => {
                updated.status.device_path = updated.status.storage_path.clone();
                updated.status.synced = true;
            }
        }
        updated.status.message.clear();
        if updated.status.state == ReplicaState::Ready {
            self.apply_qos(&replica, &mut updated).await;
        }

        if updated.status != replica.status {
            if updated.status.state != replica.status.state {
                info!(replica = %name, from = %replica.status.state, to = %updated.status.state, "Replica state changed");
            }
            self.write_replica_status(&replica, &updated).await?;
        }
        self.registry.update_for_replica(&updated).await?;

        // Nothing else wakes a replica waiting on its peers.
        if updated.status.state == ReplicaState::NotReady {
            self.replica_queue.add_rate_limited(name);
        }
        Ok(())
    }

    /// Brings the device limits in line with the replica spec. Failures are
    /// retried on the next sync.
    async fn apply_qos(&self, replica: &LocalVolumeReplica, updated: &mut LocalVolumeReplica) {
        let wanted = &replica.spec.volume_qos;
        if *wanted == updated.status.applied_qos {
            return;
        }
        let device = if updated.status.storage_path.is_empty() {
            &updated.status.device_path
        } else {
            &updated.status.storage_path
        };
        if device.is_empty() {
            return;
        }

        let applied = match IoLimits::parse(wanted) {
            Ok(limits) => self.executors.qos.apply(device, limits).await,
            Err(e) => Err(e),
        };
        match applied {
            Ok(()) => {
                info!(replica = %replica.metadata.name, device = %device, qos = ?wanted, "Applied volume QoS");
                updated.status.applied_qos = wanted.clone();
            }
            Err(e) => warn!(replica = %replica.metadata.name, device = %device, "Failed to apply volume QoS: {}", e),
        }
    }

    async fn delete_replica(&self, replica: LocalVolumeReplica) -> Result<()> {
        let volume = &replica.spec.volume_name;
        let snapshots = self.snapshots.list().await?;
        if snapshots.iter().any(|s| &s.spec.source_volume == volume) {
            return Err(AgentError::SnapshotsExist(volume.clone()));
        }

        info!(replica = %replica.metadata.name, "Deleting volume replica");
        self.config_manager.delete_config(&replica).await?;
        if let Some(executor) = self.executors.volume_executor(replica.spec.volume_kind) {
            executor.delete_volume_replica(&replica).await?;
        }

        let mut updated = replica.clone();
        updated.status.state = ReplicaState::Deleted;
        updated.status.in_use = false;
        self.write_replica_status(&replica, &updated).await
    }

    async fn cleanup_replica(&self, replica: LocalVolumeReplica) -> Result<()> {
        let name = &replica.metadata.name;
        self.registry.update_for_replica(&replica).await?;
        self.replicas.delete_opt(name).await?;

        let mut records = self.replica_records.lock().await;
        if records.get(&replica.spec.volume_name) == Some(name) {
            records.remove(&replica.spec.volume_name);
        }
        info!(replica = %name, "Volume replica removed");
        Ok(())
    }

    /// A replica record vanished. Unless it had finished deleting, the record
    /// is put back from its last known copy.
    async fn recover_replica(&self, name: &str) -> Result<()> {
        let Some(lost) = self.take_tombstone(name) else {
            return Ok(());
        };
        if lost.status.state == ReplicaState::Deleted {
            let mut records = self.replica_records.lock().await;
            if records.get(&lost.spec.volume_name).map(String::as_str) == Some(name) {
                records.remove(&lost.spec.volume_name);
            }
            return Ok(());
        }

        warn!(replica = %name, state = %lost.status.state, "Replica record deleted unexpectedly, recreating");
        let mut record = lost;
        record.metadata.resource_version = 0;
        record.metadata.uid.clear();
        record.metadata.deletion_timestamp = None;
        match self.replicas.create(&record).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_replica_status(
        &self,
        current: &LocalVolumeReplica,
        updated: &LocalVolumeReplica,
    ) -> Result<()> {
        if current.status == updated.status {
            return Ok(());
        }
        if current.status.state != updated.status.state {
            debug!(
                replica = %updated.metadata.name,
                from = %current.status.state,
                to = %updated.status.state,
                "Updating replica status"
            );
        }
        self.replicas.update_status(updated).await?;
        Ok(())
    }

    fn take_tombstone(&self, name: &str) -> Option<LocalVolumeReplica> {
        match self.tombstones.lock() {
            Ok(mut t) => t.remove(name),
            Err(poisoned) => poisoned.into_inner().remove(name),
        }
    }

    fn forget_tombstone(&self, name: &str) {
        let _ = self.take_tombstone(name);
    }
}
