use apis::{
    CsiVolumeSource, DataSet, ObjectKey, ObjectMeta, PersistentVolume, PersistentVolumeSpec,
    CSI_DRIVER_NAME, DATASET_ANNOTATION,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::manager::DatasetManager;
use crate::{Config, Result};

pub const VOLUME_USAGE_KEY: &str = "volumeUsage";
pub const VOLUME_USAGE_DATASET: &str = "AccelDataset";

pub fn is_dataset_volume(pv: &PersistentVolume) -> bool {
    pv.metadata.annotation(DATASET_ANNOTATION) == Some("true")
        || pv
            .spec
            .csi
            .as_ref()
            .and_then(|csi| csi.volume_attributes.get(VOLUME_USAGE_KEY))
            .map_or(false, |usage| usage == VOLUME_USAGE_DATASET)
}

/// The read-only persistent volume that exposes a dataset's cache.
pub fn dataset_volume(dataset: &DataSet, config: &Config) -> PersistentVolume {
    let name = dataset.metadata.name.clone();
    let mut metadata = ObjectMeta::named(name.clone());
    metadata
        .annotations
        .insert(DATASET_ANNOTATION.to_string(), "true".to_string());

    let attributes: BTreeMap<String, String> = [
        ("convertible", "false"),
        ("csi.storage.k8s.io/pv/name", name.as_str()),
        ("volumeKind", "LVM"),
        (VOLUME_USAGE_KEY, VOLUME_USAGE_DATASET),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .chain(std::iter::once(("poolClass".to_string(), config.pool_class.to_string())))
    .collect();

    PersistentVolume {
        metadata,
        spec: PersistentVolumeSpec {
            capacity_bytes: config.capacity_bytes,
            access_modes: vec!["ReadOnlyMany".to_string()],
            persistent_volume_reclaim_policy: "Retain".to_string(),
            volume_mode: "Filesystem".to_string(),
            csi: Some(CsiVolumeSource {
                driver: CSI_DRIVER_NAME.to_string(),
                volume_handle: name,
                fs_type: "xfs".to_string(),
                volume_attributes: attributes,
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

impl DatasetManager {
    pub(crate) async fn process_dataset(&self, key: &ObjectKey) -> Result<()> {
        let dataset = self.datasets(&key.namespace).get_opt(&key.name).await?;
        match dataset {
            Some(ds) if !ds.metadata.is_deleting() => self.ensure_dataset_volume(&ds).await,
            _ => self.release_dataset_volume(&key.name).await,
        }
    }

    async fn ensure_dataset_volume(&self, dataset: &DataSet) -> Result<()> {
        let name = &dataset.metadata.name;
        if self.pvs.get_opt(name).await?.is_some() {
            debug!(dataset = %dataset.metadata.key(), "Persistent volume already exists");
            return Ok(());
        }
        match self.pvs.create(&dataset_volume(dataset, &self.config)).await {
            Ok(_) => {
                info!(dataset = %dataset.metadata.key(), pv = %name, "Created dataset persistent volume");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Only volumes this manager created are removed.
    async fn release_dataset_volume(&self, name: &str) -> Result<()> {
        match self.pvs.get_opt(name).await? {
            Some(pv) if is_dataset_volume(&pv) => {
                info!(pv = %name, "Dataset gone, deleting its persistent volume");
                self.pvs.delete_opt(name).await?;
            }
            _ => debug!(pv = %name, "No dataset persistent volume to delete"),
        }
        Ok(())
    }
}
