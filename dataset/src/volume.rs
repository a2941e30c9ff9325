use apis::{
    LocalVolume, LocalVolumeSpec, ObjectMeta, PersistentVolume, PersistentVolumePhase, VolumeKind,
    DATASET_ANNOTATION,
};
use serde_json::json;
use tracing::{debug, info};

use crate::dataset::is_dataset_volume;
use crate::manager::DatasetManager;
use crate::Result;

impl DatasetManager {
    pub(crate) async fn process_persistent_volume(&self, name: &str) -> Result<()> {
        match self.pvs.get_opt(name).await? {
            None => self.delete_local_volume(name).await,
            Some(pv) if !is_dataset_volume(&pv) => Ok(()),
            Some(pv) if pv.metadata.is_deleting() => self.delete_local_volume(name).await,
            Some(pv) => {
                self.ensure_local_volume(&pv).await?;
                self.sync_volume_phase(pv).await
            }
        }
    }

    async fn ensure_local_volume(&self, pv: &PersistentVolume) -> Result<()> {
        let name = &pv.metadata.name;
        if self.volumes.get_opt(name).await?.is_some() {
            return Ok(());
        }

        let mut metadata = ObjectMeta::named(name.clone());
        metadata
            .annotations
            .insert(DATASET_ANNOTATION.to_string(), "true".to_string());
        let capacity = if pv.spec.capacity_bytes > 0 {
            pv.spec.capacity_bytes
        } else {
            self.config.capacity_bytes
        };
        let vol = LocalVolume {
            metadata,
            spec: LocalVolumeSpec {
                pool_name: self.config.pool_class.pool_name().to_string(),
                required_capacity_bytes: capacity,
                replica_number: 1,
                volume_kind: VolumeKind::Lvm,
                ..Default::default()
            },
            ..Default::default()
        };
        match self.volumes.create(&vol).await {
            Ok(_) => info!(pv = %name, capacity, pool = %vol.spec.pool_name, "Created dataset local volume"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn delete_local_volume(&self, name: &str) -> Result<()> {
        let Some(vol) = self.volumes.get_opt(name).await? else {
            debug!(volume = %name, "Local volume already gone");
            return Ok(());
        };
        if vol.metadata.annotation(DATASET_ANNOTATION) != Some("true") || vol.spec.delete {
            return Ok(());
        }
        info!(volume = %name, "Persistent volume deleted, deleting dataset local volume");
        self.volumes.patch(name, &json!({"spec": {"delete": true}})).await?;
        Ok(())
    }

    /// A released volume drops its claim reference so it can be bound again.
    async fn sync_volume_phase(&self, pv: PersistentVolume) -> Result<()> {
        match pv.status.phase {
            PersistentVolumePhase::Released => {
                let mut pv = self
                    .pvs
                    .patch(&pv.metadata.name, &json!({"spec": {"claimRef": null}}))
                    .await?;
                pv.status.phase = PersistentVolumePhase::Available;
                self.pvs.update_status(&pv).await?;
                info!(pv = %pv.metadata.name, "Cleaned claim reference of released persistent volume");
            }
            phase => debug!(pv = %pv.metadata.name, phase = %phase, "No phase change needed"),
        }
        Ok(())
    }
}
