use apis::{
    Api, ClusterNode, Informer, LocalDisk, LocalDiskClaim, LocalDiskNode, LocalStorageNode,
    LocalStorageNodeSpec, LocalVolume, LocalVolumeReplica, LocalVolumeSnapshot, ObjectMeta,
    RecordStore, WatchEvent,
};
use coordination::{run_worker, LeaderElector, LeaseConfig, TaskQueue};
use diskmonitor::DiskEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use system::{NodeAnnotationConfig, NODE_CONFIG_ANNOTATION};

use crate::config_manager::ConfigManager;
use crate::executor::Executors;
use crate::registry::Registry;
use crate::{AgentError, Config, Result};

/// Storage IP of a node: the configured annotation first, then the node
/// configuration record, then the first internal address.
pub fn resolve_storage_ip(
    node: &ClusterNode,
    annotation_key: Option<&str>,
    node_config: &NodeAnnotationConfig,
) -> Option<String> {
    if let Some(ip) = annotation_key.and_then(|key| node.metadata.annotation(key)) {
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }
    if !node_config.storage_ip.is_empty() {
        return Some(node_config.storage_ip.clone());
    }
    node.internal_ip().map(str::to_string)
}

/// Per-node storage agent. Owns the storage node record of its host and
/// materializes the replicas scheduled onto it.
pub struct NodeAgent {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) nodes: Api<LocalStorageNode>,
    pub(crate) cluster_nodes: Api<ClusterNode>,
    pub(crate) volumes: Api<LocalVolume>,
    pub(crate) replicas: Api<LocalVolumeReplica>,
    pub(crate) snapshots: Api<LocalVolumeSnapshot>,
    pub(crate) disks: Api<LocalDisk>,
    pub(crate) disk_claims: Api<LocalDiskClaim>,
    pub(crate) disk_nodes: Api<LocalDiskNode>,
    pub(crate) executors: Executors,
    pub(crate) registry: Registry,
    pub(crate) config_manager: ConfigManager,
    heartbeat: LeaderElector,
    /// volume name -> name of this node's replica of it
    pub(crate) replica_records: Mutex<HashMap<String, String>>,
    /// Last known copy of replicas whose records disappeared.
    pub(crate) tombstones: Arc<StdMutex<HashMap<String, LocalVolumeReplica>>>,
    pub(crate) volume_queue: Arc<TaskQueue<String>>,
    pub(crate) replica_queue: Arc<TaskQueue<String>>,
    pub(crate) disk_claim_queue: Arc<TaskQueue<String>>,
    pub(crate) disk_queue: Arc<TaskQueue<String>>,
    pub(crate) disk_event_queue: Arc<TaskQueue<DiskEvent>>,
    shutdown: watch::Sender<bool>,
}

impl NodeAgent {
    pub fn new(store: Arc<dyn RecordStore>, config: Config, executors: Executors) -> Arc<Self> {
        let nodes: Api<LocalStorageNode> = Api::all(store.clone());
        let volumes: Api<LocalVolume> = Api::all(store.clone());
        let registry = Registry::new(&config.node_name, nodes.clone(), executors.pools.clone());
        let config_manager = ConfigManager::new(&config.node_name, executors.replication.clone(), volumes.clone());

        let mut lease = LeaseConfig::new(&config.node_name, &config.namespace, &config.node_name);
        lease.lease_duration_ms = config.heartbeat_duration_ms;
        let heartbeat = LeaderElector::new(store.clone(), lease);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            nodes,
            volumes,
            cluster_nodes: Api::all(store.clone()),
            replicas: Api::all(store.clone()),
            snapshots: Api::all(store.clone()),
            disks: Api::all(store.clone()),
            disk_claims: Api::all(store.clone()),
            disk_nodes: Api::all(store.clone()),
            registry,
            config_manager,
            heartbeat,
            executors,
            replica_records: Mutex::new(HashMap::new()),
            tombstones: Arc::new(StdMutex::new(HashMap::new())),
            volume_queue: TaskQueue::new("LocalVolumeAssignmentQueue", config.queue),
            replica_queue: TaskQueue::new("LocalVolumeReplicaQueue", config.queue),
            disk_claim_queue: TaskQueue::new("LocalDiskClaimQueue", config.queue),
            disk_queue: TaskQueue::new("LocalDiskQueue", config.queue),
            disk_event_queue: TaskQueue::new("DiskEventQueue", diskmonitor::event_queue_config()),
            store,
            config,
            shutdown,
        })
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    /// Queue the udev monitor feeds.
    pub fn disk_event_queue(&self) -> Arc<TaskQueue<DiskEvent>> {
        self.disk_event_queue.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn replica_of(&self, volume: &str) -> Option<String> {
        self.replica_records.lock().await.get(volume).cloned()
    }

    /// Creates or refreshes the storage node record from the cluster node,
    /// then publishes the pools found on the host.
    pub async fn register(&self) -> Result<()> {
        let name = self.node_name().to_string();
        let cluster_node = self
            .cluster_nodes
            .get_opt(&name)
            .await?
            .ok_or_else(|| AgentError::NodeNotFound(name.clone()))?;

        let node_config = match cluster_node.metadata.annotation(NODE_CONFIG_ANNOTATION) {
            Some(raw) => NodeAnnotationConfig::parse(raw)?,
            None => NodeAnnotationConfig::default(),
        };
        let storage_ip = resolve_storage_ip(
            &cluster_node,
            self.config.storage_ip_annotation_key.as_deref(),
            &node_config,
        )
        .unwrap_or_default();
        if storage_ip.is_empty() {
            warn!(node = %name, "No storage IP found for node");
        }

        let spec = LocalStorageNodeSpec {
            hostname: name.clone(),
            storage_ip,
            topology: node_config.topology.clone().unwrap_or_default(),
            volume_kinds: node_config
                .local_storage_config
                .as_ref()
                .map(|c| vec![c.volume_kind])
                .unwrap_or_default(),
            ram_disk_total_capacity: node_config.ram_disk_total_capacity_bytes()?,
        };

        match self.nodes.get_opt(&name).await? {
            None => {
                info!(node = %name, storage_ip = %spec.storage_ip, "Creating storage node record");
                let node = LocalStorageNode {
                    metadata: ObjectMeta::named(&name),
                    spec,
                    status: Default::default(),
                };
                self.nodes.create(&node).await?;
            }
            Some(mut node) if node.spec != spec => {
                info!(node = %name, "Updating storage node spec");
                node.spec = spec;
                self.nodes.update(&node).await?;
            }
            Some(_) => {}
        }

        self.registry.sync_node_resources().await
    }

    /// Remembers the replicas this node already hosts and queues them.
    async fn init_cache(&self) -> Result<()> {
        let mut records = self.replica_records.lock().await;
        for replica in self.replicas.list().await? {
            if replica.spec.node_name != self.config.node_name {
                continue;
            }
            records.insert(replica.spec.volume_name.clone(), replica.metadata.name.clone());
            self.replica_queue.add(replica.metadata.name.clone());
        }
        debug!(node = %self.config.node_name, "Found {} local replicas", records.len());
        Ok(())
    }

    fn register_handlers(
        &self,
        replicas: &Informer<LocalVolumeReplica>,
        volumes: &Informer<LocalVolume>,
        claims: &Informer<LocalDiskClaim>,
        disks: &Informer<LocalDisk>,
    ) {
        let node = self.config.node_name.clone();
        let queue = self.replica_queue.clone();
        let tombstones = self.tombstones.clone();
        replicas.add_handler(Box::new(move |event: &WatchEvent<LocalVolumeReplica>| {
            let replica = event.object();
            if replica.spec.node_name != node {
                return;
            }
            if let WatchEvent::Deleted(old) = event {
                match tombstones.lock() {
                    Ok(mut t) => t.insert(old.metadata.name.clone(), old.clone()),
                    Err(poisoned) => poisoned.into_inner().insert(old.metadata.name.clone(), old.clone()),
                };
            }
            queue.add(replica.metadata.name.clone());
        }));

        let queue = self.volume_queue.clone();
        volumes.add_handler(Box::new(move |event: &WatchEvent<LocalVolume>| {
            queue.add(event.object().metadata.name.clone());
        }));

        let node = self.config.node_name.clone();
        let queue = self.disk_claim_queue.clone();
        claims.add_handler(Box::new(move |event: &WatchEvent<LocalDiskClaim>| match event {
            WatchEvent::Added(claim) | WatchEvent::Updated { new: claim, .. } if claim.spec.node_name == node => {
                queue.add(claim.metadata.name.clone());
            }
            _ => {}
        }));

        let node = self.config.node_name.clone();
        let queue = self.disk_queue.clone();
        disks.add_handler(Box::new(move |event: &WatchEvent<LocalDisk>| {
            if event.object().spec.node_name == node {
                queue.add(event.object().metadata.name.clone());
            }
        }));
    }

    /// Registers the node, then runs informers and workers until
    /// [`shutdown`](Self::shutdown).
    pub async fn run(self: Arc<Self>) -> Result<()> {
        if let Err(e) = self.heartbeat.try_acquire_or_renew().await {
            warn!(node = %self.config.node_name, "Failed to take heartbeat lease: {}", e);
        }
        self.register().await?;

        let replicas = Informer::<LocalVolumeReplica>::new(self.store.clone());
        let volumes = Informer::<LocalVolume>::new(self.store.clone());
        let claims = Informer::<LocalDiskClaim>::new(self.store.clone());
        let disks = Informer::<LocalDisk>::new(self.store.clone());
        self.register_handlers(&replicas, &volumes, &claims, &disks);

        let informers = vec![replicas.spawn(), volumes.spawn(), claims.spawn(), disks.spawn()];
        replicas.wait_for_sync().await;
        volumes.wait_for_sync().await;
        claims.wait_for_sync().await;
        disks.wait_for_sync().await;

        self.init_cache().await?;
        info!(node = %self.config.node_name, "Node agent started");

        let agent = self.clone();
        let volume_worker = run_worker(self.volume_queue.clone(), move |name: String| {
            let agent = agent.clone();
            async move { agent.process_volume(&name).await }
        });
        let agent = self.clone();
        let replica_worker = run_worker(self.replica_queue.clone(), move |name: String| {
            let agent = agent.clone();
            async move { agent.process_replica(&name).await }
        });
        let agent = self.clone();
        let claim_worker = run_worker(self.disk_claim_queue.clone(), move |name: String| {
            let agent = agent.clone();
            async move { agent.process_disk_claim(&name).await }
        });
        let agent = self.clone();
        let disk_worker = run_worker(self.disk_queue.clone(), move |name: String| {
            let agent = agent.clone();
            async move { agent.process_disk(&name).await }
        });
        let agent = self.clone();
        let event_worker = run_worker(self.disk_event_queue.clone(), move |event: DiskEvent| {
            let agent = agent.clone();
            async move { agent.process_disk_event(&event).await }
        });

        tokio::join!(
            volume_worker,
            replica_worker,
            claim_worker,
            disk_worker,
            event_worker,
            self.heartbeat_loop()
        );

        for informer in informers {
            informer.abort();
        }
        info!(node = %self.config.node_name, "Node agent stopped");
        Ok(())
    }

    /// Renews the node's heartbeat lease. A storage node record that went
    /// missing is registered again.
    async fn heartbeat_loop(&self) {
        let mut stop = self.shutdown.subscribe();
        let period = Duration::from_millis(self.config.heartbeat_period_ms);
        loop {
            if let Err(e) = self.heartbeat.try_acquire_or_renew().await {
                warn!(node = %self.config.node_name, "Failed to renew heartbeat: {}", e);
            }
            match self.nodes.get_opt(&self.config.node_name).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(node = %self.config.node_name, "Storage node record missing, registering again");
                    if let Err(e) = self.register().await {
                        error!(node = %self.config.node_name, "Failed to register node: {}", e);
                    }
                }
                Err(e) => debug!("Failed to read storage node: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = stop.changed() => break,
            }
            if *stop.borrow() {
                break;
            }
        }
    }

    pub fn shutdown(&self) {
        self.volume_queue.shutdown();
        self.replica_queue.shutdown();
        self.disk_claim_queue.shutdown();
        self.disk_queue.shutdown();
        self.disk_event_queue.shutdown();
        let _ = self.shutdown.send(true);
    }
}
