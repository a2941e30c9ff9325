use agent::NodeAgent;
use apis::{
    Api, ClusterNode, LocalStorageNode, LocalVolume, LocalVolumeConvert, LocalVolumeConvertSpec,
    LocalVolumeExpand, LocalVolumeExpandSpec, LocalVolumeGroup, LocalVolumeGroupSpec,
    LocalVolumeMigrate, LocalVolumeMigrateSpec, LocalVolumeReplica, MemoryStore, NodeState,
    ObjectMeta, OperationState, PersistentVolumeClaim, RecordStore, VolumeInfo, VolumeState, GIB,
    MIB, VOLUME_GROUP_FINALIZER,
};
use controller::{expand_capacity_needed, ControllerManager};
use local_storage_tests::{
    agent_config, cluster_node, controller_config, eventually, fast_queue, init_tracing,
    local_volume, storage_node, FakeHost, FaultyStore, POOL_CAPACITY,
};
use scheduler::Scheduler;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use volumegroup::VolumeGroupManager;

struct Cluster {
    store: Arc<dyn RecordStore>,
    controller: Arc<ControllerManager>,
    agents: Vec<(Arc<NodeAgent>, FakeHost)>,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// A controller plus one agent per node, all on fake hosts.
    async fn start(nodes: &[&str]) -> Self {
        Self::start_with(Arc::new(MemoryStore::new()), nodes).await
    }

    async fn start_with(store: Arc<dyn RecordStore>, nodes: &[&str]) -> Self {
        init_tracing();
        let cluster_nodes: Api<ClusterNode> = Api::all(store.clone());
        for (i, node) in nodes.iter().enumerate() {
            cluster_nodes
                .create(&cluster_node(node, &format!("192.168.1.{}", 10 + i)))
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        let mut agents = Vec::new();
        for node in nodes {
            let host = FakeHost::new(POOL_CAPACITY);
            let agent = NodeAgent::new(store.clone(), agent_config(node), host.executors.clone());
            let runner = agent.clone();
            tasks.push(tokio::spawn(async move {
                runner.run().await.unwrap();
            }));
            agents.push((agent, host));
        }

        let controller = Self::controller(store.clone());
        let runner = controller.clone();
        tasks.push(tokio::spawn(async move {
            runner.run().await.unwrap();
        }));

        let cluster = Self {
            store,
            controller,
            agents,
            tasks,
        };
        let expected = nodes.len();
        let store = cluster.store.clone();
        eventually("storage nodes ready", || {
            let nodes: Api<LocalStorageNode> = Api::all(store.clone());
            async move {
                let nodes = nodes.list().await.unwrap();
                nodes.len() == expected && nodes.iter().all(|n| n.status.state == NodeState::Ready)
            }
        })
        .await;
        cluster
    }

    fn controller(store: Arc<dyn RecordStore>) -> Arc<ControllerManager> {
        let groups = VolumeGroupManager::new(store.clone(), volumegroup::Config { queue: fast_queue() });
        ControllerManager::new(
            store,
            controller_config("controller-1"),
            Arc::new(Scheduler::new(scheduler::Config::default())),
            groups,
        )
    }

    fn volumes(&self) -> Api<LocalVolume> {
        Api::all(self.store.clone())
    }

    async fn wait_for_volume<F>(&self, name: &str, what: &str, check: F)
    where
        F: Fn(&LocalVolume) -> bool,
    {
        let volumes = self.volumes();
        let check = &check;
        eventually(what, || {
            let volumes = volumes.clone();
            let name = name.to_string();
            async move { volumes.get_opt(&name).await.unwrap().map_or(false, |v| check(&v)) }
        })
        .await;
    }

    fn migrates(&self) -> Api<LocalVolumeMigrate> {
        Api::all(self.store.clone())
    }

    fn converts(&self) -> Api<LocalVolumeConvert> {
        Api::all(self.store.clone())
    }

    fn groups(&self) -> Api<LocalVolumeGroup> {
        Api::all(self.store.clone())
    }

    /// Live replica records of `volume`, sorted by node.
    async fn replica_nodes(&self, volume: &str) -> Vec<String> {
        let replicas: Api<LocalVolumeReplica> = Api::all(self.store.clone());
        let mut nodes: Vec<String> = replicas
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.spec.volume_name == volume)
            .map(|r| r.spec.node_name)
            .collect();
        nodes.sort();
        nodes
    }

    async fn wait_for_migrate(&self, name: &str, state: OperationState) -> LocalVolumeMigrate {
        let migrates = self.migrates();
        eventually(&format!("migrate {} {}", name, state), || {
            let migrates = migrates.clone();
            let name = name.to_string();
            async move { migrates.get_opt(&name).await.unwrap().map_or(false, |m| m.status.state == state) }
        })
        .await;
        migrates.get(name).await.unwrap()
    }

    async fn wait_for_convert(&self, name: &str, state: OperationState) -> LocalVolumeConvert {
        let converts = self.converts();
        eventually(&format!("convert {} {}", name, state), || {
            let converts = converts.clone();
            let name = name.to_string();
            async move { converts.get_opt(&name).await.unwrap().map_or(false, |c| c.status.state == state) }
        })
        .await;
        converts.get(name).await.unwrap()
    }

    async fn stop(self) {
        self.controller.shutdown();
        for (agent, _) in &self.agents {
            agent.shutdown();
        }
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

#[test]
fn test_thin_pools_need_metadata_room() {
    assert_eq!(expand_capacity_needed(GIB, false), GIB);
    // small deltas still reserve one extent of metadata per copy
    assert_eq!(expand_capacity_needed(GIB, true), GIB + 8 * MIB);
    assert_eq!(expand_capacity_needed(100 * GIB, true), 100 * GIB + 2 * (100 * GIB / 1000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_volume_created_and_deleted() {
    let cluster = Cluster::start(&["node-1"]).await;
    let volumes = cluster.volumes();
    volumes.create(&local_volume("pvc-a", GIB, 1)).await.unwrap();

    cluster
        .wait_for_volume("pvc-a", "volume ready", |v| v.status.state == VolumeState::Ready)
        .await;
    let vol = volumes.get("pvc-a").await.unwrap();
    let config = vol.spec.config.clone().unwrap();
    assert_eq!(config.nodes(), vec!["node-1".to_string()]);
    assert_eq!(config.resource_id, -1);
    assert_eq!(vol.status.allocated_capacity_bytes, GIB);
    assert_eq!(vol.status.replicas.len(), 1);
    assert!(vol.status.replicas[0].starts_with("pvc-a-"));

    volumes.patch("pvc-a", &json!({"spec": {"delete": true}})).await.unwrap();
    let store = cluster.store.clone();
    eventually("volume removed", || {
        let volumes: Api<LocalVolume> = Api::all(store.clone());
        async move { volumes.get_opt("pvc-a").await.unwrap().is_none() }
    })
    .await;

    let replicas: Api<LocalVolumeReplica> = Api::all(cluster.store.clone());
    assert!(replicas.list().await.unwrap().is_empty());
    assert_eq!(cluster.agents[0].1.volumes.deleted(), vec!["pvc-a".to_string()]);
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ha_volume_spans_two_nodes() {
    let cluster = Cluster::start(&["node-1", "node-2"]).await;
    let volumes = cluster.volumes();
    volumes.create(&local_volume("pvc-ha", GIB, 2)).await.unwrap();

    cluster
        .wait_for_volume("pvc-ha", "HA volume ready", |v| {
            v.status.state == VolumeState::Ready && v.spec.config.as_ref().map_or(false, |c| c.initialized)
        })
        .await;

    let vol = volumes.get("pvc-ha").await.unwrap();
    let config = vol.spec.config.unwrap();
    assert!(config.is_ha());
    assert!(config.ready_to_initialize);
    assert_eq!(config.resource_id, 0);
    assert_eq!(config.replicas.len(), 2);
    assert_eq!(config.replicas.iter().filter(|r| r.primary).count(), 1);
    assert_eq!(vol.status.replicas.len(), 2);

    let initialized: Vec<String> = cluster
        .agents
        .iter()
        .flat_map(|(_, host)| host.replication.initialized())
        .collect();
    assert_eq!(initialized, vec!["pvc-ha".to_string()]);
    assert_eq!(cluster.controller.scheduler().resource_id("pvc-ha"), Some(0));
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expand_completes() {
    let cluster = Cluster::start(&["node-1"]).await;
    let volumes = cluster.volumes();
    volumes.create(&local_volume("pvc-a", GIB, 1)).await.unwrap();
    cluster
        .wait_for_volume("pvc-a", "volume ready", |v| v.status.state == VolumeState::Ready)
        .await;

    let expands: Api<LocalVolumeExpand> = Api::all(cluster.store.clone());
    expands
        .create(&LocalVolumeExpand {
            metadata: ObjectMeta::named("pvc-a"),
            spec: LocalVolumeExpandSpec {
                volume_name: "pvc-a".to_string(),
                required_capacity_bytes: 2 * GIB,
                abort: false,
            },
            ..Default::default()
        })
        .await
        .unwrap();

    let store = cluster.store.clone();
    eventually("expand completed", || {
        let expands: Api<LocalVolumeExpand> = Api::all(store.clone());
        async move { expands.get("pvc-a").await.unwrap().status.state == OperationState::Completed }
    })
    .await;

    let op = expands.get("pvc-a").await.unwrap();
    assert!(op.status.allocated_capacity_bytes >= 2 * GIB);
    let vol = volumes.get("pvc-a").await.unwrap();
    assert_eq!(vol.spec.required_capacity_bytes, 2 * GIB);
    assert_eq!(vol.status.allocated_capacity_bytes, 2 * GIB);
    assert_eq!(
        cluster.agents[0].1.volumes.expanded(),
        vec![("pvc-a".to_string(), 2 * GIB)]
    );
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expand_of_missing_volume_fails() {
    let cluster = Cluster::start(&["node-1"]).await;
    let expands: Api<LocalVolumeExpand> = Api::all(cluster.store.clone());
    expands
        .create(&LocalVolumeExpand {
            metadata: ObjectMeta::named("pvc-missing"),
            spec: LocalVolumeExpandSpec {
                volume_name: "pvc-missing".to_string(),
                required_capacity_bytes: 2 * GIB,
                abort: false,
            },
            ..Default::default()
        })
        .await
        .unwrap();

    let store = cluster.store.clone();
    eventually("expand failed", || {
        let expands: Api<LocalVolumeExpand> = Api::all(store.clone());
        async move { expands.get("pvc-missing").await.unwrap().status.state == OperationState::Failed }
    })
    .await;
    let op = expands.get("pvc-missing").await.unwrap();
    assert!(op.status.message.contains("pvc-missing"));
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_node_state_follows_heartbeat() {
    init_tracing();
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let cluster_nodes: Api<ClusterNode> = Api::all(store.clone());
    cluster_nodes.create(&cluster_node("node-silent", "192.168.1.20")).await.unwrap();

    let nodes: Api<LocalStorageNode> = Api::all(store.clone());
    nodes.create(&storage_node("node-silent", POOL_CAPACITY)).await.unwrap();
    nodes.create(&storage_node("node-gone", POOL_CAPACITY)).await.unwrap();

    let controller = Cluster::controller(store.clone());
    let runner = controller.clone();
    let task = tokio::spawn(async move { runner.run().await.unwrap() });

    eventually("silent node offline", || {
        let nodes = nodes.clone();
        async move { nodes.get("node-silent").await.unwrap().status.state == NodeState::Offline }
    })
    .await;
    eventually("vanished node removed", || {
        let nodes = nodes.clone();
        async move { nodes.get_opt("node-gone").await.unwrap().is_none() }
    })
    .await;

    controller.shutdown();
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claim_removal_deletes_volume() {
    init_tracing();
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(store.clone(), "apps");
    pvcs.create(&PersistentVolumeClaim {
        metadata: ObjectMeta::namespaced("apps", "data"),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut vol = local_volume("pvc-data", GIB, 1);
    vol.spec.persistent_volume_claim_namespace = "apps".to_string();
    vol.spec.persistent_volume_claim_name = "data".to_string();
    let volumes: Api<LocalVolume> = Api::all(store.clone());
    volumes.create(&vol).await.unwrap();

    let controller = Cluster::controller(store.clone());
    let runner = controller.clone();
    let task = tokio::spawn(async move { runner.run().await.unwrap() });

    eventually("volume being scheduled", || {
        let volumes = volumes.clone();
        async move { volumes.get("pvc-data").await.unwrap().status.state == VolumeState::Creating }
    })
    .await;

    pvcs.delete("data").await.unwrap();
    eventually("volume removed with its claim", || {
        let volumes = volumes.clone();
        async move { volumes.get_opt("pvc-data").await.unwrap().is_none() }
    })
    .await;

    controller.shutdown();
    task.await.unwrap();
}

fn ha_ready(v: &LocalVolume) -> bool {
    v.status.state == VolumeState::Ready && v.spec.config.as_ref().map_or(false, |c| c.initialized)
}

fn migrate(name: &str, volume: &str, source: &str, all: bool) -> LocalVolumeMigrate {
    LocalVolumeMigrate {
        metadata: ObjectMeta::named(name),
        spec: LocalVolumeMigrateSpec {
            volume_name: volume.to_string(),
            source_node: source.to_string(),
            target_nodes_suggested: Vec::new(),
            migrate_all_vols: all,
            abort: false,
        },
        status: Default::default(),
    }
}

fn group(name: &str, volumes: &[&str]) -> LocalVolumeGroup {
    LocalVolumeGroup {
        metadata: ObjectMeta::named(name),
        spec: LocalVolumeGroupSpec {
            namespace: "apps".to_string(),
            volumes: volumes
                .iter()
                .map(|v| VolumeInfo {
                    pvc_name: String::new(),
                    local_volume_name: v.to_string(),
                })
                .collect(),
            ..Default::default()
        },
    }
}

/// Creates an HA volume, waits for it, and migrates it off its first node.
/// Returns the source node and the finished migrate.
async fn migrate_ha_volume(cluster: &Cluster, volume: &str) -> (String, LocalVolumeMigrate) {
    let volumes = cluster.volumes();
    volumes.create(&local_volume(volume, GIB, 2)).await.unwrap();
    cluster.wait_for_volume(volume, "HA volume ready", ha_ready).await;

    let placed = volumes.get(volume).await.unwrap().spec.config.unwrap().nodes();
    let source = placed[0].clone();
    cluster.migrates().create(&migrate("mig-1", volume, &source, false)).await.unwrap();
    let op = cluster.wait_for_migrate("mig-1", OperationState::Completed).await;
    (source, op)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ha_volume_migrates_off_source_node() {
    let cluster = Cluster::start(&["node-1", "node-2", "node-3"]).await;
    let (source, op) = migrate_ha_volume(&cluster, "pvc-m").await;

    assert_eq!(op.status.original_replica_number, 2);
    assert_ne!(op.status.target_node, source);
    cluster
        .wait_for_volume("pvc-m", "migrated volume ready", |v| v.status.state == VolumeState::Ready)
        .await;
    let vol = cluster.volumes().get("pvc-m").await.unwrap();
    let config = vol.spec.config.unwrap();
    assert_eq!(vol.spec.replica_number, 2);
    assert_eq!(config.replicas.len(), 2);
    assert!(config.replica_on(&source).is_none());
    assert!(config.replica_on(&op.status.target_node).is_some());
    assert_eq!(config.replicas.iter().filter(|r| r.primary).count(), 1);
    assert!(!cluster.replica_nodes("pvc-m").await.contains(&source));
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_migrate_retry_grows_volume_once() {
    let store = Arc::new(FaultyStore::default());
    store.fail_status_once("LocalVolumeMigrate", "mig-1", "InProgress");
    let cluster = Cluster::start_with(store.clone(), &["node-1", "node-2", "node-3"]).await;

    let (source, op) = migrate_ha_volume(&cluster, "pvc-r").await;
    assert_eq!(store.injected(), 1);
    assert_eq!(op.status.original_replica_number, 2);

    cluster
        .wait_for_volume("pvc-r", "migrated volume ready", |v| v.status.state == VolumeState::Ready)
        .await;
    let vol = cluster.volumes().get("pvc-r").await.unwrap();
    let config = vol.spec.config.unwrap();
    assert_eq!(vol.spec.replica_number, 2);
    assert_eq!(config.replicas.len(), 2);
    assert!(config.replica_on(&source).is_none());
    assert_eq!(cluster.replica_nodes("pvc-r").await.len(), 2);
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_convert_makes_volume_ha() {
    let cluster = Cluster::start(&["node-1", "node-2"]).await;
    let volumes = cluster.volumes();
    let mut vol = local_volume("pvc-c", GIB, 1);
    vol.spec.convertible = true;
    volumes.create(&vol).await.unwrap();
    cluster
        .wait_for_volume("pvc-c", "volume ready", |v| v.status.state == VolumeState::Ready)
        .await;
    assert_eq!(volumes.get("pvc-c").await.unwrap().spec.config.unwrap().replicas.len(), 1);

    cluster
        .converts()
        .create(&LocalVolumeConvert {
            metadata: ObjectMeta::named("conv-1"),
            spec: LocalVolumeConvertSpec {
                volume_name: "pvc-c".to_string(),
                replica_number: 2,
                abort: false,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    cluster.wait_for_convert("conv-1", OperationState::Completed).await;

    let vol = volumes.get("pvc-c").await.unwrap();
    assert_eq!(vol.status.state, VolumeState::Ready);
    assert_eq!(vol.spec.replica_number, 2);
    let config = vol.spec.config.unwrap();
    assert_eq!(config.nodes().len(), 2);
    assert_eq!(config.resource_id, 0);
    assert_eq!(cluster.controller.scheduler().resource_id("pvc-c"), Some(0));
    assert_eq!(cluster.replica_nodes("pvc-c").await, vec!["node-1", "node-2"]);
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_group_convert_rejects_unconvertible_member() {
    let cluster = Cluster::start(&["node-1"]).await;
    cluster.groups().create(&group("grp-c", &["pvc-ga", "pvc-gb"])).await.unwrap();

    let volumes = cluster.volumes();
    let mut a = local_volume("pvc-ga", GIB, 1);
    a.spec.convertible = true;
    a.spec.volume_group = "grp-c".to_string();
    let mut b = local_volume("pvc-gb", GIB, 1);
    b.spec.volume_group = "grp-c".to_string();
    volumes.create(&a).await.unwrap();
    volumes.create(&b).await.unwrap();
    for name in ["pvc-ga", "pvc-gb"] {
        cluster
            .wait_for_volume(name, "group volume ready", |v| v.status.state == VolumeState::Ready)
            .await;
    }

    cluster
        .converts()
        .create(&LocalVolumeConvert {
            metadata: ObjectMeta::named("conv-g"),
            spec: LocalVolumeConvertSpec {
                volume_name: "pvc-ga".to_string(),
                replica_number: 2,
                abort: false,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    let op = cluster.wait_for_convert("conv-g", OperationState::Failed).await;
    assert!(op.status.message.contains("pvc-gb"), "{}", op.status.message);
    assert!(op.status.message.contains("not convertible"), "{}", op.status.message);
    assert_eq!(volumes.get("pvc-ga").await.unwrap().spec.replica_number, 1);
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_group_migrate_moves_every_member() {
    let cluster = Cluster::start(&["node-1", "node-2", "node-3"]).await;
    cluster.groups().create(&group("grp-m", &["pvc-ma", "pvc-mb"])).await.unwrap();

    let volumes = cluster.volumes();
    for name in ["pvc-ma", "pvc-mb"] {
        let mut vol = local_volume(name, GIB, 2);
        vol.spec.volume_group = "grp-m".to_string();
        vol.spec.accessibility.nodes = vec!["node-1".to_string(), "node-2".to_string()];
        volumes.create(&vol).await.unwrap();
    }
    for name in ["pvc-ma", "pvc-mb"] {
        cluster.wait_for_volume(name, "group volume ready", ha_ready).await;
    }

    cluster.migrates().create(&migrate("gmig", "pvc-ma", "node-1", true)).await.unwrap();
    cluster.wait_for_migrate("gmig", OperationState::Completed).await;
    let child = cluster.migrates().get("gmig-pvc-mb").await.unwrap();
    assert_eq!(child.status.state, OperationState::Completed);
    assert_eq!(child.spec.source_node, "node-1");
    assert!(!child.spec.migrate_all_vols);

    for name in ["pvc-ma", "pvc-mb"] {
        let mut nodes = volumes.get(name).await.unwrap().spec.config.unwrap().nodes();
        nodes.sort();
        assert_eq!(nodes, vec!["node-2", "node-3"], "{}", name);
    }
    let groups = cluster.groups();
    eventually("group follows its volumes", || {
        let groups = groups.clone();
        async move {
            let mut nodes = groups.get("grp-m").await.unwrap().spec.accessibility.nodes;
            nodes.sort();
            nodes == vec!["node-2", "node-3"]
        }
    })
    .await;
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lost_volume_record_is_recreated() {
    let cluster = Cluster::start(&["node-1", "node-2"]).await;
    let volumes = cluster.volumes();
    volumes.create(&local_volume("pvc-l", GIB, 2)).await.unwrap();
    cluster.wait_for_volume("pvc-l", "HA volume ready", ha_ready).await;
    let before = volumes.get("pvc-l").await.unwrap();
    let scheduler = cluster.controller.scheduler();
    let free_ids = scheduler.free_resource_ids();
    let replica_nodes = cluster.replica_nodes("pvc-l").await;

    volumes.delete("pvc-l").await.unwrap();
    let uid = before.metadata.uid.clone();
    cluster
        .wait_for_volume("pvc-l", "volume recreated", |v| v.metadata.uid != uid)
        .await;
    cluster
        .wait_for_volume("pvc-l", "recreated volume ready", |v| v.status.state == VolumeState::Ready)
        .await;

    let after = volumes.get("pvc-l").await.unwrap();
    assert_eq!(after.spec, before.spec);
    assert_eq!(scheduler.resource_id("pvc-l"), Some(0));
    assert_eq!(scheduler.free_resource_ids(), free_ids);
    assert_eq!(cluster.replica_nodes("pvc-l").await, replica_nodes);
    let deleted: Vec<String> = cluster
        .agents
        .iter()
        .flat_map(|(_, host)| host.volumes.deleted())
        .collect();
    assert!(deleted.is_empty());
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_emptied_group_drops_finalizer() {
    let cluster = Cluster::start(&["node-1"]).await;
    let groups = cluster.groups();
    groups.create(&group("grp-e", &["pvc-e"])).await.unwrap();
    let mut vol = local_volume("pvc-e", GIB, 1);
    vol.spec.volume_group = "grp-e".to_string();
    cluster.volumes().create(&vol).await.unwrap();
    cluster
        .wait_for_volume("pvc-e", "volume ready", |v| v.status.state == VolumeState::Ready)
        .await;
    eventually("group protected", || {
        let groups = groups.clone();
        async move { groups.get("grp-e").await.unwrap().metadata.has_finalizer(VOLUME_GROUP_FINALIZER) }
    })
    .await;

    cluster.volumes().patch("pvc-e", &json!({"spec": {"delete": true}})).await.unwrap();
    eventually("empty group released", || {
        let groups = groups.clone();
        async move {
            groups
                .get_opt("grp-e")
                .await
                .unwrap()
                .map_or(true, |g| !g.metadata.has_finalizer(VOLUME_GROUP_FINALIZER))
        }
    })
    .await;
    eventually("empty group removed", || {
        let groups = groups.clone();
        async move { groups.get_opt("grp-e").await.unwrap().is_none() }
    })
    .await;
    cluster.stop().await;
}
