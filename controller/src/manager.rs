use apis::{
    Api, ClusterNode, Informer, Lease, LocalDisk, LocalDiskClaim, LocalStorageNode, LocalVolume,
    LocalVolumeConvert, LocalVolumeExpand, LocalVolumeGroup, LocalVolumeMigrate,
    LocalVolumeReplica, LocalVolumeSnapshotRestore, ObjectKey, PersistentVolumeClaim, Pod,
    RecordStore, VolumeState, WatchEvent, CONTROLLER_LEASE_NAME,
};
use coordination::{run_worker, LeaderElector, LeaseConfig, TaskQueue};
use scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, error, info};
use volumegroup::VolumeGroupManager;

use crate::recovery::Tombstones;
use crate::{Config, Result};

/// Cluster-wide reconciler. Only the holder of the controller lease runs
/// the workers; the others wait on the lease.
pub struct ControllerManager {
    pub(crate) config: Config,
    store: Arc<dyn RecordStore>,
    pub(crate) scheduler: Arc<Scheduler>,
    groups: Arc<VolumeGroupManager>,

    pub(crate) nodes: Api<LocalStorageNode>,
    pub(crate) cluster_nodes: Api<ClusterNode>,
    pub(crate) leases: Api<Lease>,
    pub(crate) volumes: Api<LocalVolume>,
    pub(crate) replicas: Api<LocalVolumeReplica>,
    pub(crate) expands: Api<LocalVolumeExpand>,
    pub(crate) migrates: Api<LocalVolumeMigrate>,
    pub(crate) converts: Api<LocalVolumeConvert>,
    pub(crate) volume_groups: Api<LocalVolumeGroup>,
    pub(crate) disks: Api<LocalDisk>,
    pub(crate) disk_claims: Api<LocalDiskClaim>,
    pub(crate) pvcs: Api<PersistentVolumeClaim>,
    pub(crate) restores: Api<LocalVolumeSnapshotRestore>,

    pub(crate) volume_queue: Arc<TaskQueue<String>>,
    pub(crate) expand_queue: Arc<TaskQueue<String>>,
    pub(crate) migrate_queue: Arc<TaskQueue<String>>,
    pub(crate) convert_queue: Arc<TaskQueue<String>>,
    pub(crate) disk_claim_queue: Arc<TaskQueue<String>>,
    pub(crate) node_queue: Arc<TaskQueue<String>>,
    pub(crate) k8s_node_queue: Arc<TaskQueue<String>>,
    pub(crate) pvc_queue: Arc<TaskQueue<ObjectKey>>,
    pub(crate) restore_queue: Arc<TaskQueue<String>>,

    pub(crate) lost_volumes: Arc<Tombstones<LocalVolume>>,
    pub(crate) lost_expands: Arc<Tombstones<LocalVolumeExpand>>,
    pub(crate) lost_migrates: Arc<Tombstones<LocalVolumeMigrate>>,
    pub(crate) lost_converts: Arc<Tombstones<LocalVolumeConvert>>,

    shutdown: watch::Sender<bool>,
}

impl ControllerManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        config: Config,
        scheduler: Arc<Scheduler>,
        groups: Arc<VolumeGroupManager>,
    ) -> Arc<Self> {
        let queue = config.queue;
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            nodes: Api::all(store.clone()),
            cluster_nodes: Api::all(store.clone()),
            leases: Api::namespaced(store.clone(), &config.namespace),
            volumes: Api::all(store.clone()),
            replicas: Api::all(store.clone()),
            expands: Api::all(store.clone()),
            migrates: Api::all(store.clone()),
            converts: Api::all(store.clone()),
            volume_groups: Api::all(store.clone()),
            disks: Api::all(store.clone()),
            disk_claims: Api::all(store.clone()),
            pvcs: Api::all(store.clone()),
            restores: Api::all(store.clone()),
            volume_queue: TaskQueue::new("VolumeTaskQueue", queue),
            expand_queue: TaskQueue::new("VolumeExpandTaskQueue", queue),
            migrate_queue: TaskQueue::new("VolumeMigrateTaskQueue", queue),
            convert_queue: TaskQueue::new("VolumeConvertTaskQueue", queue),
            disk_claim_queue: TaskQueue::new("DiskClaimTaskQueue", queue),
            node_queue: TaskQueue::new("NodeTaskQueue", queue),
            k8s_node_queue: TaskQueue::new("K8sNodeTaskQueue", queue),
            pvc_queue: TaskQueue::new("PVCTaskQueue", queue),
            restore_queue: TaskQueue::new("SnapshotRestoreTaskQueue", queue),
            lost_volumes: Arc::new(Tombstones::new()),
            lost_expands: Arc::new(Tombstones::new()),
            lost_migrates: Arc::new(Tombstones::new()),
            lost_converts: Arc::new(Tombstones::new()),
            store,
            scheduler,
            groups,
            config,
            shutdown,
        })
    }

    /// Campaigns for the controller lease and reconciles while holding it.
    /// Losing the lease is returned as an error.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut lease = LeaseConfig::new(CONTROLLER_LEASE_NAME, &self.config.namespace, &self.config.identity);
        lease.lease_duration_ms = self.config.lease_duration_ms;
        lease.renew_deadline_ms = self.config.renew_deadline_ms;
        lease.retry_period_ms = self.config.retry_period_ms;
        let elector = LeaderElector::new(self.store.clone(), lease);

        let manager = self.clone();
        elector
            .run_with_lease(async move {
                if let Err(e) = manager.start().await {
                    error!("Controller manager failed: {}", e);
                }
            })
            .await?;
        elector.release().await?;
        Ok(())
    }

    async fn start(self: &Arc<Self>) -> Result<()> {
        info!(identity = %self.config.identity, "Starting controller manager");

        let nodes = Informer::<LocalStorageNode>::new(self.store.clone());
        let volumes = Informer::<LocalVolume>::new(self.store.clone());
        let replicas = Informer::<LocalVolumeReplica>::new(self.store.clone());
        let expands = Informer::<LocalVolumeExpand>::new(self.store.clone());
        let migrates = Informer::<LocalVolumeMigrate>::new(self.store.clone());
        let converts = Informer::<LocalVolumeConvert>::new(self.store.clone());
        let claims = Informer::<LocalDiskClaim>::new(self.store.clone());
        let cluster_nodes = Informer::<ClusterNode>::new(self.store.clone());
        let pvcs = Informer::<PersistentVolumeClaim>::new(self.store.clone());
        let pods = Informer::<Pod>::new(self.store.clone());
        let groups = Informer::<LocalVolumeGroup>::new(self.store.clone());
        let restores = Informer::<LocalVolumeSnapshotRestore>::new(self.store.clone());

        self.scheduler.register_handlers(&nodes, &volumes);
        self.groups.register_handlers(&groups, &volumes, &pvcs, &pods);
        self.register_volume_handlers(&volumes, &replicas);
        self.register_operation_handlers(&expands, &migrates, &converts, &restores);
        self.register_node_handlers(&nodes, &cluster_nodes, &claims, &pvcs);

        let handles = vec![
            nodes.spawn(),
            volumes.spawn(),
            replicas.spawn(),
            expands.spawn(),
            migrates.spawn(),
            converts.spawn(),
            claims.spawn(),
            cluster_nodes.spawn(),
            pvcs.spawn(),
            pods.spawn(),
            groups.spawn(),
            restores.spawn(),
        ];
        nodes.wait_for_sync().await;
        volumes.wait_for_sync().await;
        replicas.wait_for_sync().await;
        expands.wait_for_sync().await;
        migrates.wait_for_sync().await;
        converts.wait_for_sync().await;
        claims.wait_for_sync().await;
        cluster_nodes.wait_for_sync().await;
        pvcs.wait_for_sync().await;
        pods.wait_for_sync().await;
        groups.wait_for_sync().await;
        restores.wait_for_sync().await;

        self.scheduler.init(&volumes.list().await, &nodes.list().await);

        macro_rules! worker {
            ($queue:ident, $process:ident, $key:ty) => {{
                let manager = self.clone();
                run_worker(self.$queue.clone(), move |key: $key| {
                    let manager = manager.clone();
                    async move { manager.$process(&key).await }
                })
            }};
        }

        tokio::join!(
            worker!(volume_queue, process_volume, String),
            worker!(expand_queue, process_expand, String),
            worker!(migrate_queue, process_migrate, String),
            worker!(convert_queue, process_convert, String),
            worker!(disk_claim_queue, process_disk_claim, String),
            worker!(node_queue, process_node, String),
            worker!(k8s_node_queue, process_cluster_node, String),
            worker!(pvc_queue, process_claim_removal, ObjectKey),
            worker!(restore_queue, process_restore, String),
            self.groups.clone().run(),
            self.node_sync_loop(),
        );

        for handle in handles {
            handle.abort();
        }
        info!("Controller manager stopped");
        Ok(())
    }

    fn register_volume_handlers(
        &self,
        volumes: &Informer<LocalVolume>,
        replicas: &Informer<LocalVolumeReplica>,
    ) {
        let queue = self.volume_queue.clone();
        let lost = self.lost_volumes.clone();
        volumes.add_handler(Box::new(move |event: &WatchEvent<LocalVolume>| {
            if let WatchEvent::Deleted(vol) = event {
                if vol.status.state != VolumeState::Deleted {
                    lost.insert(vol.clone());
                }
            }
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.volume_queue.clone();
        replicas.add_handler(Box::new(move |event: &WatchEvent<LocalVolumeReplica>| {
            queue.add(event.object().spec.volume_name.clone());
        }));
    }

    fn register_operation_handlers(
        &self,
        expands: &Informer<LocalVolumeExpand>,
        migrates: &Informer<LocalVolumeMigrate>,
        converts: &Informer<LocalVolumeConvert>,
        restores: &Informer<LocalVolumeSnapshotRestore>,
    ) {
        let queue = self.expand_queue.clone();
        let lost = self.lost_expands.clone();
        expands.add_handler(Box::new(move |event: &WatchEvent<LocalVolumeExpand>| {
            if let WatchEvent::Deleted(op) = event {
                if !op.status.state.is_terminal() {
                    lost.insert(op.clone());
                }
            }
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.migrate_queue.clone();
        let lost = self.lost_migrates.clone();
        migrates.add_handler(Box::new(move |event: &WatchEvent<LocalVolumeMigrate>| {
            if let WatchEvent::Deleted(op) = event {
                if !op.status.state.is_terminal() && !op.spec.abort {
                    lost.insert(op.clone());
                }
            }
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.convert_queue.clone();
        let lost = self.lost_converts.clone();
        converts.add_handler(Box::new(move |event: &WatchEvent<LocalVolumeConvert>| {
            if let WatchEvent::Deleted(op) = event {
                if !op.status.state.is_terminal() {
                    lost.insert(op.clone());
                }
            }
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.restore_queue.clone();
        restores.add_handler(Box::new(move |event: &WatchEvent<LocalVolumeSnapshotRestore>| {
            if !matches!(event, WatchEvent::Deleted(_)) {
                queue.add(event.object().metadata.name.clone());
            }
        }));
    }

    fn register_node_handlers(
        &self,
        nodes: &Informer<LocalStorageNode>,
        cluster_nodes: &Informer<ClusterNode>,
        claims: &Informer<LocalDiskClaim>,
        pvcs: &Informer<PersistentVolumeClaim>,
    ) {
        let queue = self.node_queue.clone();
        nodes.add_handler(Box::new(move |event: &WatchEvent<LocalStorageNode>| {
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.k8s_node_queue.clone();
        cluster_nodes.add_handler(Box::new(move |event: &WatchEvent<ClusterNode>| {
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.disk_claim_queue.clone();
        claims.add_handler(Box::new(move |event: &WatchEvent<LocalDiskClaim>| {
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.pvc_queue.clone();
        pvcs.add_handler(Box::new(move |event: &WatchEvent<PersistentVolumeClaim>| {
            if let WatchEvent::Deleted(pvc) = event {
                queue.add(pvc.metadata.key());
            }
        }));
    }

    /// Re-checks every storage node's heartbeat once per sync period.
    async fn node_sync_loop(&self) {
        let mut stop = self.shutdown.subscribe();
        let period = Duration::from_millis(self.config.node_sync_period_ms);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = stop.changed() => break,
            }
            if *stop.borrow() {
                break;
            }
            match self.nodes.list().await {
                Ok(nodes) => {
                    for node in nodes {
                        self.node_queue.add(node.metadata.name);
                    }
                }
                Err(e) => debug!("Failed to list storage nodes: {}", e),
            }
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn shutdown(&self) {
        self.volume_queue.shutdown();
        self.expand_queue.shutdown();
        self.migrate_queue.shutdown();
        self.convert_queue.shutdown();
        self.disk_claim_queue.shutdown();
        self.node_queue.shutdown();
        self.k8s_node_queue.shutdown();
        self.pvc_queue.shutdown();
        self.restore_queue.shutdown();
        self.groups.shutdown();
        let _ = self.shutdown.send(true);
    }
}
