use apis::{
    Api, DataSet, Informer, LocalVolume, ObjectKey, PersistentVolume, RecordStore, WatchEvent,
};
use coordination::{run_worker, LeaderElector, LeaseConfig, TaskQueue};
use std::sync::Arc;
use tracing::info;

use crate::dataset::is_dataset_volume;
use crate::{Config, Result, DATASET_LEASE_NAME};

/// Mirrors datasets into persistent volumes, and dataset persistent volumes
/// into local volumes.
pub struct DatasetManager {
    pub(crate) config: Config,
    store: Arc<dyn RecordStore>,
    pub(crate) pvs: Api<PersistentVolume>,
    pub(crate) volumes: Api<LocalVolume>,
    dataset_queue: Arc<TaskQueue<ObjectKey>>,
    pub(crate) pv_queue: Arc<TaskQueue<String>>,
}

impl DatasetManager {
    pub fn new(store: Arc<dyn RecordStore>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            pvs: Api::all(store.clone()),
            volumes: Api::all(store.clone()),
            dataset_queue: TaskQueue::new("DataSetTask", config.queue),
            pv_queue: TaskQueue::new("PersistentVolumeTask", config.queue),
            store,
            config,
        })
    }

    pub(crate) fn datasets(&self, namespace: &str) -> Api<DataSet> {
        Api::namespaced(self.store.clone(), namespace)
    }

    pub fn register_handlers(&self, datasets: &Informer<DataSet>, pvs: &Informer<PersistentVolume>) {
        let queue = self.dataset_queue.clone();
        datasets.add_handler(Box::new(move |event: &WatchEvent<DataSet>| {
            queue.add(event.object().metadata.key());
        }));

        let queue = self.pv_queue.clone();
        pvs.add_handler(Box::new(move |event: &WatchEvent<PersistentVolume>| {
            if is_dataset_volume(event.object()) {
                queue.add(event.object().metadata.name.clone());
            }
        }));
    }

    /// Runs the workers, behind the dataset lease when leader election is on.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        if !self.config.leader_election {
            self.start().await;
            return Ok(());
        }

        let mut lease = LeaseConfig::new(DATASET_LEASE_NAME, &self.config.namespace, &self.config.identity);
        lease.lease_duration_ms = self.config.lease_duration_ms;
        lease.renew_deadline_ms = self.config.renew_deadline_ms;
        lease.retry_period_ms = self.config.retry_period_ms;
        let elector = LeaderElector::new(self.store.clone(), lease);

        let manager = self.clone();
        elector.run_with_lease(async move { manager.start().await }).await?;
        elector.release().await?;
        Ok(())
    }

    async fn start(self: &Arc<Self>) {
        info!(identity = %self.config.identity, "Starting dataset manager");

        let datasets = Informer::<DataSet>::new(self.store.clone());
        let pvs = Informer::<PersistentVolume>::new(self.store.clone());
        self.register_handlers(&datasets, &pvs);

        let handles = vec![datasets.spawn(), pvs.spawn()];
        datasets.wait_for_sync().await;
        pvs.wait_for_sync().await;

        let manager = self.clone();
        let dataset_worker = run_worker(self.dataset_queue.clone(), move |key: ObjectKey| {
            let manager = manager.clone();
            async move { manager.process_dataset(&key).await }
        });
        let manager = self.clone();
        let pv_worker = run_worker(self.pv_queue.clone(), move |name: String| {
            let manager = manager.clone();
            async move { manager.process_persistent_volume(&name).await }
        });
        tokio::join!(dataset_worker, pv_worker);

        for handle in handles {
            handle.abort();
        }
        info!("Dataset manager stopped");
    }

    pub fn shutdown(&self) {
        self.dataset_queue.shutdown();
        self.pv_queue.shutdown();
    }
}
