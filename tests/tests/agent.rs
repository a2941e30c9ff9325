use agent::{
    ha_device_path, render_resource, AgentError, CgroupQos, DrbdConfig, DrbdExecutor, IoLimits, NodeAgent,
    ReplicationExecutor,
};
use apis::{
    Api, ClusterNode, DiskAttributes, DiskClaimDescription, DiskClaimState, DiskClaimStatus, DiskClass,
    HaState, LocalDisk, LocalDiskClaim, LocalDiskClaimSpec, LocalDiskSpec, LocalDiskState,
    LocalStorageNode, LocalVolume, LocalVolumeReplica, LocalVolumeReplicaSpec, MemoryStore, NodeState,
    ObjectMeta, RecordStore, ReplicaState, VolumeConfig, VolumeKind, VolumeQoS, VolumeReplicaEntry, GIB,
    POOL_NAME_HDD,
};
use diskmonitor::parse_event_block;
use local_storage_tests::{
    agent_config, cluster_node, eventually, init_tracing, placed_volume, FakeHost, ScriptedRunner,
    POOL_CAPACITY,
};
use serde_json::json;
use std::sync::Arc;
use system::NodeAnnotationConfig;

fn store() -> Arc<dyn RecordStore> {
    Arc::new(MemoryStore::new())
}

async fn local_replica(store: &Arc<dyn RecordStore>, volume: &str) -> Option<LocalVolumeReplica> {
    let replicas: Api<LocalVolumeReplica> = Api::all(store.clone());
    replicas
        .list()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.spec.volume_name == volume)
}

#[test]
fn test_storage_ip_resolution_order() {
    let mut node = cluster_node("node-1", "192.168.1.10");
    let none = NodeAnnotationConfig::default();
    assert_eq!(agent::resolve_storage_ip(&node, None, &none).as_deref(), Some("192.168.1.10"));

    let configured = NodeAnnotationConfig {
        storage_ip: "10.6.0.2".to_string(),
        ..Default::default()
    };
    assert_eq!(
        agent::resolve_storage_ip(&node, Some("storage/ipv4"), &configured).as_deref(),
        Some("10.6.0.2")
    );

    node.metadata
        .annotations
        .insert("storage/ipv4".to_string(), "10.7.0.3".to_string());
    assert_eq!(
        agent::resolve_storage_ip(&node, Some("storage/ipv4"), &configured).as_deref(),
        Some("10.7.0.3")
    );

    assert_eq!(agent::resolve_storage_ip(&ClusterNode::default(), None, &none), None);
}

#[tokio::test]
async fn test_register_requires_cluster_node() {
    let store = store();
    let host = FakeHost::new(POOL_CAPACITY);
    let agent = NodeAgent::new(store, agent_config("node-1"), host.executors);

    let err = agent.register().await.unwrap_err();
    assert!(matches!(err, AgentError::NodeNotFound(ref node) if node == "node-1"));
}

#[tokio::test]
async fn test_register_publishes_pools() {
    let store = store();
    let cluster: Api<ClusterNode> = Api::all(store.clone());
    cluster.create(&cluster_node("node-1", "192.168.1.10")).await.unwrap();

    let host = FakeHost::new(POOL_CAPACITY);
    let agent = NodeAgent::new(store.clone(), agent_config("node-1"), host.executors);
    agent.register().await.unwrap();

    let nodes: Api<LocalStorageNode> = Api::all(store);
    let node = nodes.get("node-1").await.unwrap();
    assert_eq!(node.spec.hostname, "node-1");
    assert_eq!(node.spec.storage_ip, "192.168.1.10");
    assert_eq!(node.status.state, NodeState::Ready);
    let pool = &node.status.pools[POOL_NAME_HDD];
    assert_eq!(pool.total_capacity_bytes, POOL_CAPACITY);
    assert_eq!(pool.free_capacity_bytes, POOL_CAPACITY);
    assert_eq!(agent.registry().pools().await.len(), 1);
    assert!(agent.registry().has_disks().await);

    // registering again leaves an unchanged record alone
    let version = node.metadata.resource_version;
    agent.register().await.unwrap();
    assert_eq!(nodes.get("node-1").await.unwrap().metadata.resource_version, version);
}

#[tokio::test]
async fn test_replica_lifecycle() {
    init_tracing();
    let store = store();
    let cluster: Api<ClusterNode> = Api::all(store.clone());
    cluster.create(&cluster_node("node-1", "192.168.1.10")).await.unwrap();
    let volumes: Api<LocalVolume> = Api::all(store.clone());
    volumes.create(&placed_volume("pvc-a", GIB, &["node-1"], -1)).await.unwrap();

    let host = FakeHost::new(POOL_CAPACITY);
    let fake_volumes = host.volumes.clone();
    let agent = NodeAgent::new(store.clone(), agent_config("node-1"), host.executors);
    let running = tokio::spawn(agent.clone().run());

    eventually("replica ready", || {
        let store = store.clone();
        async move {
            local_replica(&store, "pvc-a")
                .await
                .map_or(false, |r| r.is_ready_and_synced())
        }
    })
    .await;

    let replica = local_replica(&store, "pvc-a").await.unwrap();
    assert!(replica.metadata.name.starts_with("pvc-a-"));
    assert_eq!(replica.metadata.name.len(), "pvc-a-".len() + 6);
    assert_eq!(replica.spec.node_name, "node-1");
    assert_eq!(replica.status.storage_path, format!("/dev/{}/pvc-a", POOL_NAME_HDD));
    assert_eq!(replica.status.device_path, replica.status.storage_path);
    assert_eq!(replica.status.allocated_capacity_bytes, GIB);
    assert_eq!(agent.replica_of("pvc-a").await, Some(replica.metadata.name.clone()));
    assert_eq!(fake_volumes.created(), vec!["pvc-a".to_string()]);

    eventually("pool usage published", || {
        let store = store.clone();
        async move {
            let nodes: Api<LocalStorageNode> = Api::all(store);
            let node = nodes.get("node-1").await.unwrap();
            node.status.pools[POOL_NAME_HDD].used_capacity_bytes == GIB
        }
    })
    .await;

    let replicas: Api<LocalVolumeReplica> = Api::all(store.clone());
    replicas
        .patch(&replica.metadata.name, &json!({"spec": {"delete": true}}))
        .await
        .unwrap();

    eventually("replica removed", || {
        let store = store.clone();
        async move { local_replica(&store, "pvc-a").await.is_none() }
    })
    .await;
    assert_eq!(fake_volumes.deleted(), vec!["pvc-a".to_string()]);

    let nodes: Api<LocalStorageNode> = Api::all(store);
    let node = nodes.get("node-1").await.unwrap();
    assert_eq!(node.status.pools[POOL_NAME_HDD].used_capacity_bytes, 0);

    agent.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_ha_primary_initializes_volume() {
    init_tracing();
    let store = store();
    let cluster: Api<ClusterNode> = Api::all(store.clone());
    cluster.create(&cluster_node("node-1", "192.168.1.10")).await.unwrap();

    let mut vol = placed_volume("pvc-ha", GIB, &["node-1", "node-2"], 0);
    if let Some(config) = vol.spec.config.as_mut() {
        config.ready_to_initialize = true;
    }
    let volumes: Api<LocalVolume> = Api::all(store.clone());
    volumes.create(&vol).await.unwrap();

    let host = FakeHost::new(POOL_CAPACITY);
    let replication = host.replication.clone();
    let agent = NodeAgent::new(store.clone(), agent_config("node-1"), host.executors);
    let running = tokio::spawn(agent.clone().run());

    eventually("HA replica ready", || {
        let store = store.clone();
        async move {
            local_replica(&store, "pvc-ha")
                .await
                .map_or(false, |r| r.is_ready_and_synced())
        }
    })
    .await;

    let replica = local_replica(&store, "pvc-ha").await.unwrap();
    assert_eq!(replica.status.device_path, ha_device_path(POOL_NAME_HDD, "pvc-ha"));
    assert_eq!(replica.status.ha_state, Some(HaState::Consistent));
    assert_eq!(replication.initialized(), vec!["pvc-ha".to_string()]);
    assert!(replication.applied().iter().any(|(name, version)| name == &replica.metadata.name && *version == 1));

    eventually("volume marked initialized", || {
        let volumes = volumes.clone();
        async move {
            volumes
                .get("pvc-ha")
                .await
                .unwrap()
                .spec
                .config
                .map_or(false, |c| c.initialized)
        }
    })
    .await;

    agent.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_replica_of_unserved_kind_is_invalid() {
    let store = store();
    let cluster: Api<ClusterNode> = Api::all(store.clone());
    cluster.create(&cluster_node("node-1", "192.168.1.10")).await.unwrap();

    let mut vol = placed_volume("pvc-disk", GIB, &["node-1"], -1);
    vol.spec.volume_kind = VolumeKind::Disk;
    let volumes: Api<LocalVolume> = Api::all(store.clone());
    volumes.create(&vol).await.unwrap();

    let host = FakeHost::new(POOL_CAPACITY);
    let agent = NodeAgent::new(store.clone(), agent_config("node-1"), host.executors);
    let running = tokio::spawn(agent.clone().run());

    eventually("replica invalid", || {
        let store = store.clone();
        async move {
            local_replica(&store, "pvc-disk")
                .await
                .map_or(false, |r| r.status.state == ReplicaState::Invalid)
        }
    })
    .await;
    assert!(host.volumes.created().is_empty());

    agent.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_replica_applies_volume_qos() {
    init_tracing();
    let store = store();
    let cluster: Api<ClusterNode> = Api::all(store.clone());
    cluster.create(&cluster_node("node-1", "192.168.1.10")).await.unwrap();

    let qos = VolumeQoS {
        throughput: "100Mi".to_string(),
        iops: "1000".to_string(),
    };
    let mut vol = placed_volume("pvc-qos", GIB, &["node-1"], -1);
    vol.spec.volume_qos = qos.clone();
    let volumes: Api<LocalVolume> = Api::all(store.clone());
    volumes.create(&vol).await.unwrap();

    let host = FakeHost::new(POOL_CAPACITY);
    let limits = host.qos.clone();
    let agent = NodeAgent::new(store.clone(), agent_config("node-1"), host.executors);
    let running = tokio::spawn(agent.clone().run());

    eventually("limits applied", || {
        let store = store.clone();
        let qos = qos.clone();
        async move {
            local_replica(&store, "pvc-qos")
                .await
                .map_or(false, |r| r.is_ready_and_synced() && r.status.applied_qos == qos)
        }
    })
    .await;
    let device = format!("/dev/{}/pvc-qos", POOL_NAME_HDD);
    let expected = (
        device.clone(),
        IoLimits {
            iops: 1000,
            throughput: 100 * 1024 * 1024,
        },
    );
    let applied = limits.applied();
    assert!(!applied.is_empty());
    assert!(applied.iter().all(|a| a == &expected), "{:?}", applied);

    // lifting the limits reaches the device too
    volumes
        .patch("pvc-qos", &json!({"spec": {"volumeQoS": {"throughput": "", "iops": ""}}}))
        .await
        .unwrap();
    eventually("limits lifted", || {
        let store = store.clone();
        async move {
            local_replica(&store, "pvc-qos")
                .await
                .map_or(false, |r| r.spec.volume_qos.is_empty() && r.status.applied_qos.is_empty())
        }
    })
    .await;
    assert_eq!(limits.applied().last(), Some(&(device, IoLimits::default())));

    agent.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_not_ready_replica_expands() {
    init_tracing();
    let store = store();
    let cluster: Api<ClusterNode> = Api::all(store.clone());
    cluster.create(&cluster_node("node-1", "192.168.1.10")).await.unwrap();
    let volumes: Api<LocalVolume> = Api::all(store.clone());
    volumes.create(&placed_volume("pvc-grow", 2 * GIB, &["node-1"], -1)).await.unwrap();

    // a replica that went NotReady before its backing caught up with a resize
    let replicas: Api<LocalVolumeReplica> = Api::all(store.clone());
    let mut replica = LocalVolumeReplica {
        metadata: ObjectMeta::named("pvc-grow-abcdef"),
        spec: LocalVolumeReplicaSpec {
            volume_name: "pvc-grow".to_string(),
            pool_name: POOL_NAME_HDD.to_string(),
            node_name: "node-1".to_string(),
            required_capacity_bytes: 2 * GIB,
            volume_kind: VolumeKind::Lvm,
            ..Default::default()
        },
        ..Default::default()
    };
    replica = replicas.create(&replica).await.unwrap();
    replica.status.state = ReplicaState::NotReady;
    replica.status.allocated_capacity_bytes = GIB;
    replica.status.storage_path = format!("/dev/{}/pvc-grow", POOL_NAME_HDD);
    replicas.update_status(&replica).await.unwrap();

    let host = FakeHost::new(POOL_CAPACITY);
    let fake_volumes = host.volumes.clone();
    let agent = NodeAgent::new(store.clone(), agent_config("node-1"), host.executors);
    let running = tokio::spawn(agent.clone().run());

    eventually("replica grown and ready", || {
        let store = store.clone();
        async move {
            local_replica(&store, "pvc-grow").await.map_or(false, |r| {
                r.is_ready_and_synced() && r.status.allocated_capacity_bytes == 2 * GIB
            })
        }
    })
    .await;
    assert_eq!(fake_volumes.expanded(), vec![("pvc-grow".to_string(), 2 * GIB)]);
    assert!(fake_volumes.created().is_empty());

    agent.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_replica_survives_lost_volume_record() {
    init_tracing();
    let store = store();
    let cluster: Api<ClusterNode> = Api::all(store.clone());
    cluster.create(&cluster_node("node-1", "192.168.1.10")).await.unwrap();
    let volumes: Api<LocalVolume> = Api::all(store.clone());
    let volume = placed_volume("pvc-lost", GIB, &["node-1"], -1);
    volumes.create(&volume).await.unwrap();

    let host = FakeHost::new(POOL_CAPACITY);
    let fake_volumes = host.volumes.clone();
    let agent = NodeAgent::new(store.clone(), agent_config("node-1"), host.executors);
    let running = tokio::spawn(agent.clone().run());

    eventually("replica ready", || {
        let store = store.clone();
        async move {
            local_replica(&store, "pvc-lost")
                .await
                .map_or(false, |r| r.is_ready_and_synced())
        }
    })
    .await;
    let before = local_replica(&store, "pvc-lost").await.unwrap();

    volumes.delete("pvc-lost").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let kept = local_replica(&store, "pvc-lost").await.unwrap();
    assert_eq!(kept.metadata.name, before.metadata.name);
    assert!(!kept.spec.delete);

    volumes.create(&volume).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let after = local_replica(&store, "pvc-lost").await.unwrap();
    assert_eq!(after.metadata.name, before.metadata.name);
    assert!(after.is_ready_and_synced());
    assert!(fake_volumes.deleted().is_empty());
    assert_eq!(fake_volumes.created(), vec!["pvc-lost".to_string()]);

    agent.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_hot_plugged_disk_grows_pool() {
    init_tracing();
    let store = store();
    let cluster: Api<ClusterNode> = Api::all(store.clone());
    cluster.create(&cluster_node("node-a", "192.168.1.10")).await.unwrap();

    let host = FakeHost::new(POOL_CAPACITY);
    let pools = host.pools.clone();
    let agent = NodeAgent::new(store.clone(), agent_config("node-a"), host.executors);
    let running = tokio::spawn(agent.clone().run());

    let nodes: Api<LocalStorageNode> = Api::all(store.clone());
    eventually("node registered", || {
        let nodes = nodes.clone();
        async move { nodes.get_opt("node-a").await.unwrap().is_some() }
    })
    .await;

    // the disk as discovered, already claimed for the node
    let disks: Api<LocalDisk> = Api::all(store.clone());
    let mut disk = disks
        .create(&LocalDisk {
            metadata: ObjectMeta::named("node-a-sdx"),
            spec: LocalDiskSpec {
                node_name: "node-a".to_string(),
                dev_path: "/dev/sdx".to_string(),
                capacity: 50 * GIB,
                state: LocalDiskState::Active,
                claim_ref: Some("claim-sdx".to_string()),
                disk_attributes: DiskAttributes {
                    disk_type: DiskClass::Hdd,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    disk.status.claim_state = DiskClaimState::Claimed;
    disks.update_status(&disk).await.unwrap();

    let claims: Api<LocalDiskClaim> = Api::all(store.clone());
    let mut claim = claims
        .create(&LocalDiskClaim {
            metadata: ObjectMeta::named("claim-sdx"),
            spec: LocalDiskClaimSpec {
                node_name: "node-a".to_string(),
                description: DiskClaimDescription {
                    disk_type: DiskClass::Hdd,
                    ..Default::default()
                },
                disk_refs: vec!["node-a-sdx".to_string()],
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    claim.status.status = DiskClaimStatus::Bound;
    claims.update_status(&claim).await.unwrap();

    let event = parse_event_block(
        "ACTION=add\nDEVNAME=/dev/sdx\nDEVTYPE=disk\nSUBSYSTEM=block\nMAJOR=8\nMINOR=48\nSEQNUM=42",
    )
    .unwrap();
    assert_eq!(event.seq_num, 42);
    agent.disk_event_queue().add(event);

    eventually("claim consumed", || {
        let claims = claims.clone();
        async move { claims.get("claim-sdx").await.unwrap().status.status == DiskClaimStatus::Consumed }
    })
    .await;
    assert_eq!(pools.extended(), vec!["/dev/sdx".to_string()]);
    assert_eq!(disks.get("node-a-sdx").await.unwrap().status.claim_state, DiskClaimState::InUse);

    let node = nodes.get("node-a").await.unwrap();
    assert_eq!(
        node.status.pools[POOL_NAME_HDD].total_capacity_bytes,
        POOL_CAPACITY + 50 * GIB
    );
    assert!(node.status.pool_extend_records[POOL_NAME_HDD].contains(&claim.spec));

    agent.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cgroup_limits_by_hierarchy() {
    let limits = IoLimits {
        iops: 500,
        throughput: 1024 * 1024,
    };

    let legacy = tempfile::tempdir().unwrap();
    let blkio = legacy.path().join("blkio");
    std::fs::create_dir(&blkio).unwrap();
    CgroupQos::new(legacy.path()).apply_device(253, 3, limits).await.unwrap();
    let read = |file: &str| std::fs::read_to_string(blkio.join(file)).unwrap();
    assert_eq!(read("blkio.throttle.read_bps_device"), "253:3 1048576");
    assert_eq!(read("blkio.throttle.write_bps_device"), "253:3 1048576");
    assert_eq!(read("blkio.throttle.read_iops_device"), "253:3 500");
    assert_eq!(read("blkio.throttle.write_iops_device"), "253:3 500");

    let unified = tempfile::tempdir().unwrap();
    std::fs::write(unified.path().join("cgroup.controllers"), "io memory").unwrap();
    std::fs::create_dir(unified.path().join("kubepods")).unwrap();
    CgroupQos::new(unified.path()).apply_device(8, 16, limits).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(unified.path().join("kubepods").join("io.max")).unwrap(),
        "8:16 rbps=1048576 wbps=1048576 riops=500 wiops=500"
    );

    let bare = tempfile::tempdir().unwrap();
    assert!(CgroupQos::new(bare.path()).apply_device(8, 16, limits).await.is_err());
}

fn peers() -> Vec<VolumeReplicaEntry> {
    vec![
        VolumeReplicaEntry {
            id: 1,
            hostname: "node-1".to_string(),
            ip: "10.0.0.1".to_string(),
            primary: true,
        },
        VolumeReplicaEntry {
            id: 2,
            hostname: "node-2".to_string(),
            ip: "10.0.0.2".to_string(),
            primary: false,
        },
    ]
}

#[test]
fn test_render_resource() {
    let rendered = render_resource("pvc-a", 43001, 43001, "/dev/LocalStorage_PoolHDD/pvc-a", &peers());

    assert!(rendered.starts_with("resource pvc-a {\n"));
    assert!(rendered.contains("  on node-1 {\n    device    minor 43001;\n"));
    assert!(rendered.contains("    disk      /dev/LocalStorage_PoolHDD/pvc-a;\n"));
    assert!(rendered.contains("    address   10.0.0.2:43001;\n"));
    assert!(rendered.contains("    node-id 2;\n"));
    assert!(rendered.contains("    hosts node-1 node-2;\n"));
    assert!(rendered.ends_with("}\n"));
}

fn ha_replica(device_path: &str) -> LocalVolumeReplica {
    let mut replica = LocalVolumeReplica::default();
    replica.metadata.name = "pvc-a-abcdef".to_string();
    replica.spec.volume_name = "pvc-a".to_string();
    replica.spec.pool_name = POOL_NAME_HDD.to_string();
    replica.spec.node_name = "node-1".to_string();
    replica.status.storage_path = format!("/dev/{}/pvc-a", POOL_NAME_HDD);
    replica.status.device_path = device_path.to_string();
    replica
}

fn ha_config() -> VolumeConfig {
    VolumeConfig {
        version: 1,
        volume_name: "pvc-a".to_string(),
        required_capacity_bytes: GIB,
        convertible: true,
        resource_id: 2,
        replicas: peers(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_drbd_apply_config_creates_metadata_once() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::default());
    runner.respond("drbdadm dstate pvc-a", "Diskless/DUnknown\n");
    runner.fail("drbdmeta", 255, "no valid meta data found");

    let drbd = DrbdExecutor::new(
        runner.clone(),
        DrbdConfig {
            start_port: 43001,
            config_dir: dir.path().to_path_buf(),
        },
        "node-1",
    );
    drbd.apply_config(&ha_replica(""), &ha_config()).await.unwrap();

    let written = std::fs::read_to_string(drbd.config_path("pvc-a")).unwrap();
    assert!(written.contains("device    minor 43003;"));
    assert!(written.contains("address   10.0.0.1:43003;"));

    let calls = runner.calls();
    assert!(calls.contains(&"drbdadm create-md pvc-a --max-peers 3 --force".to_string()));
    assert!(calls.contains(&"drbdadm adjust pvc-a".to_string()));
    assert_eq!(calls.last().map(String::as_str), Some("drbdadm resize pvc-a"));
}

#[tokio::test]
async fn test_drbd_attached_resource_skips_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::default());
    runner.respond("drbdadm dstate", "UpToDate/UpToDate\n");

    let drbd = DrbdExecutor::new(
        runner.clone(),
        DrbdConfig {
            start_port: 43001,
            config_dir: dir.path().to_path_buf(),
        },
        "node-1",
    );
    drbd.apply_config(&ha_replica(""), &ha_config()).await.unwrap();

    assert!(!runner.calls().iter().any(|c| c.contains("create-md")));
    assert_eq!(drbd.ha_state(&ha_replica("")).await.unwrap(), HaState::Consistent);

    runner.respond("drbdadm dstate", "Inconsistent/UpToDate\n");
    assert_eq!(drbd.ha_state(&ha_replica("")).await.unwrap(), HaState::Inconsistent);
}

#[tokio::test]
async fn test_drbd_initialize_only_on_primary() {
    let runner = Arc::new(ScriptedRunner::default());
    let drbd = DrbdExecutor::new(runner.clone(), DrbdConfig::default(), "node-2");
    let err = drbd.initialize(&ha_replica(""), &ha_config()).await.unwrap_err();
    assert!(matches!(err, AgentError::Replication(_)));
    assert!(runner.calls().is_empty());

    let primary = DrbdExecutor::new(runner.clone(), DrbdConfig::default(), "node-1");
    runner.respond("drbdadm dstate", "Inconsistent/Inconsistent\n");
    runner.respond("drbdadm cstate", "Connected\n");
    primary.initialize(&ha_replica(""), &ha_config()).await.unwrap();
    assert!(runner
        .calls()
        .contains(&"drbdadm new-current-uuid pvc-a --clear-bitmap".to_string()));
}
