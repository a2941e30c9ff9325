//! Shared fixtures for the integration suite: record builders, in-memory
//! executors standing in for LVM and DRBD, and polling helpers.

use agent::{Executors, HostVolume, IoLimits, PoolExecutor, QosExecutor, ReplicationExecutor, VolumeExecutor};
use apis::{
    round_to_extent, ClusterNode, ClusterNodeStatus, DiskClass, HaState, LocalDevice, LocalPool,
    LocalStorageNode, LocalStorageNodeSpec, LocalStorageNodeStatus, LocalVolume,
    LocalVolumeReplica, LocalVolumeReplicaStatus, LocalVolumeSpec, NodeAddress, NodeState,
    MemoryStore, ObjectKey, ObjectMeta, RawEvent, RecordStore, ReplicaState, StoreError,
    VolumeConfig, VolumeKind, GIB, POOL_NAME_HDD,
};
use async_trait::async_trait;
use coordination::QueueConfig;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde_json::Value;
use system::{CommandOutput, CommandRunner};
use tokio::sync::broadcast;

pub const NAMESPACE: &str = "local-storage-system";
pub const POOL_CAPACITY: i64 = 100 * GIB;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const POLL_TIMEOUT: Duration = Duration::from_secs(15);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Retries within milliseconds so reconcile loops settle quickly.
pub fn fast_queue() -> QueueConfig {
    QueueConfig {
        base_delay_ms: 10,
        max_delay_ms: 200,
        max_retries: 0,
    }
}

/// Polls `check` until it holds, panicking with `what` after the timeout.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub fn agent_config(node: &str) -> agent::Config {
    agent::Config {
        node_name: node.to_string(),
        namespace: NAMESPACE.to_string(),
        queue: fast_queue(),
        heartbeat_period_ms: 200,
        ..Default::default()
    }
}

pub fn controller_config(identity: &str) -> controller::Config {
    controller::Config {
        identity: identity.to_string(),
        namespace: NAMESPACE.to_string(),
        queue: fast_queue(),
        node_sync_period_ms: 200,
        ..Default::default()
    }
}

pub fn cluster_node(name: &str, ip: &str) -> ClusterNode {
    ClusterNode {
        metadata: ObjectMeta::named(name),
        status: ClusterNodeStatus {
            addresses: vec![NodeAddress {
                address_type: "InternalIP".to_string(),
                address: ip.to_string(),
            }],
            conditions: Vec::new(),
        },
    }
}

pub fn hdd_pool(capacity: i64) -> LocalPool {
    LocalPool {
        name: POOL_NAME_HDD.to_string(),
        class: DiskClass::Hdd,
        path: format!("/dev/{}", POOL_NAME_HDD),
        total_capacity_bytes: capacity,
        free_capacity_bytes: capacity,
        volume_capacity_bytes_limit: capacity,
        total_volume_count: 1000,
        free_volume_count: 1000,
        disks: vec![LocalDevice {
            dev_path: "/dev/sdb".to_string(),
            class: DiskClass::Hdd,
            capacity_bytes: capacity,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A Ready storage node with one HDD pool of `capacity` bytes.
pub fn storage_node(name: &str, capacity: i64) -> LocalStorageNode {
    let mut pools = BTreeMap::new();
    pools.insert(POOL_NAME_HDD.to_string(), hdd_pool(capacity));
    LocalStorageNode {
        metadata: ObjectMeta::named(name),
        spec: LocalStorageNodeSpec {
            hostname: name.to_string(),
            storage_ip: "10.0.0.1".to_string(),
            ..Default::default()
        },
        status: LocalStorageNodeStatus {
            state: NodeState::Ready,
            pools,
            ..Default::default()
        },
    }
}

pub fn local_volume(name: &str, capacity: i64, replicas: i64) -> LocalVolume {
    LocalVolume {
        metadata: ObjectMeta::named(name),
        spec: LocalVolumeSpec {
            pool_name: POOL_NAME_HDD.to_string(),
            required_capacity_bytes: capacity,
            replica_number: replicas,
            convertible: replicas >= 2,
            volume_kind: VolumeKind::Lvm,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A volume already scheduled onto `nodes`.
pub fn placed_volume(name: &str, capacity: i64, nodes: &[&str], resource_id: i32) -> LocalVolume {
    let mut vol = local_volume(name, capacity, nodes.len() as i64);
    vol.spec.config = Some(VolumeConfig {
        version: 1,
        volume_name: name.to_string(),
        required_capacity_bytes: capacity,
        convertible: vol.spec.convertible,
        resource_id,
        replicas: nodes
            .iter()
            .enumerate()
            .map(|(i, node)| apis::VolumeReplicaEntry {
                id: i as i64 + 1,
                hostname: node.to_string(),
                ip: String::new(),
                primary: i == 0,
            })
            .collect(),
        ..Default::default()
    });
    vol
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A status write that fails once with a conflict.
struct StatusFault {
    kind: String,
    name: String,
    state: String,
}

/// An in-memory store that can reject chosen status writes, for driving
/// reconcilers through their retry paths.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Mutex<Vec<StatusFault>>,
    injected: Mutex<usize>,
}

impl FaultyStore {
    /// Fails the next `update_status` of `kind/name` that writes `state`.
    pub fn fail_status_once(&self, kind: &str, name: &str, state: &str) {
        lock(&self.faults).push(StatusFault {
            kind: kind.to_string(),
            name: name.to_string(),
            state: state.to_string(),
        });
    }

    pub fn injected(&self) -> usize {
        *lock(&self.injected)
    }

    fn take_fault(&self, kind: &str, object: &Value) -> bool {
        let name = object["metadata"]["name"].as_str().unwrap_or_default();
        let state = object["status"]["state"].as_str().unwrap_or_default();
        let mut faults = lock(&self.faults);
        let Some(pos) = faults
            .iter()
            .position(|f| f.kind == kind && f.name == name && f.state == state)
        else {
            return false;
        };
        faults.remove(pos);
        *lock(&self.injected) += 1;
        true
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn get(&self, kind: &str, key: &ObjectKey) -> apis::Result<Value> {
        self.inner.get(kind, key).await
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> apis::Result<Vec<Value>> {
        self.inner.list(kind, namespace).await
    }

    async fn create(&self, kind: &str, object: Value) -> apis::Result<Value> {
        self.inner.create(kind, object).await
    }

    async fn update(&self, kind: &str, object: Value) -> apis::Result<Value> {
        self.inner.update(kind, object).await
    }

    async fn update_status(&self, kind: &str, object: Value) -> apis::Result<Value> {
        if self.take_fault(kind, &object) {
            return Err(StoreError::Conflict {
                kind: kind.to_string(),
                key: object["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                given: 0,
                current: 0,
            });
        }
        self.inner.update_status(kind, object).await
    }

    async fn patch(&self, kind: &str, key: &ObjectKey, patch: Value) -> apis::Result<Value> {
        self.inner.patch(kind, key, patch).await
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> apis::Result<()> {
        self.inner.delete(kind, key).await
    }

    async fn watch(&self, kind: &str) -> apis::Result<broadcast::Receiver<RawEvent>> {
        self.inner.watch(kind).await
    }
}

/// One HDD pool that grows by the capacity of every disk it is extended
/// with; extensions are recorded.
pub struct FakePools {
    capacity: Mutex<i64>,
    pub extended: Mutex<Vec<LocalDevice>>,
}

impl FakePools {
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity: Mutex::new(capacity),
            extended: Mutex::new(Vec::new()),
        }
    }

    pub fn extended(&self) -> Vec<String> {
        lock(&self.extended).iter().map(|d| d.dev_path.clone()).collect()
    }
}

#[async_trait]
impl PoolExecutor for FakePools {
    async fn get_pools(&self) -> agent::Result<BTreeMap<String, LocalPool>> {
        let mut pools = BTreeMap::new();
        pools.insert(POOL_NAME_HDD.to_string(), hdd_pool(*lock(&self.capacity)));
        Ok(pools)
    }

    async fn get_volumes(&self) -> agent::Result<HashMap<String, HostVolume>> {
        Ok(HashMap::new())
    }

    async fn extend_pools(&self, disks: &[LocalDevice]) -> agent::Result<bool> {
        *lock(&self.capacity) += disks.iter().map(|d| d.capacity_bytes).sum::<i64>();
        lock(&self.extended).extend_from_slice(disks);
        Ok(!disks.is_empty())
    }
}

/// Logical volumes that exist only as call records.
#[derive(Default)]
pub struct FakeVolumes {
    pub created: Mutex<Vec<String>>,
    pub expanded: Mutex<Vec<(String, i64)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeVolumes {
    fn status(replica: &LocalVolumeReplica, allocated: i64) -> LocalVolumeReplicaStatus {
        let mut status = replica.status.clone();
        status.storage_path = format!("/dev/{}/{}", replica.spec.pool_name, replica.spec.volume_name);
        status.allocated_capacity_bytes = allocated;
        status.disks = vec!["/dev/sdb".to_string()];
        status.state = ReplicaState::Ready;
        status
    }

    pub fn created(&self) -> Vec<String> {
        lock(&self.created).clone()
    }

    pub fn expanded(&self) -> Vec<(String, i64)> {
        lock(&self.expanded).clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

#[async_trait]
impl VolumeExecutor for FakeVolumes {
    async fn create_volume_replica(&self, replica: &LocalVolumeReplica) -> agent::Result<LocalVolumeReplicaStatus> {
        lock(&self.created).push(replica.spec.volume_name.clone());
        Ok(Self::status(replica, round_to_extent(replica.spec.required_capacity_bytes)))
    }

    async fn expand_volume_replica(
        &self,
        replica: &LocalVolumeReplica,
        capacity_bytes: i64,
    ) -> agent::Result<LocalVolumeReplicaStatus> {
        lock(&self.expanded).push((replica.spec.volume_name.clone(), capacity_bytes));
        Ok(Self::status(replica, round_to_extent(capacity_bytes)))
    }

    async fn delete_volume_replica(&self, replica: &LocalVolumeReplica) -> agent::Result<()> {
        lock(&self.deleted).push(replica.spec.volume_name.clone());
        Ok(())
    }

    async fn test_volume_replica(&self, replica: &LocalVolumeReplica) -> agent::Result<LocalVolumeReplicaStatus> {
        let allocated = match replica.status.allocated_capacity_bytes {
            0 => round_to_extent(replica.spec.required_capacity_bytes),
            allocated => allocated,
        };
        Ok(Self::status(replica, allocated))
    }
}

/// Replication that reports a fixed HA state.
pub struct FakeReplication {
    state: Mutex<HaState>,
    pub applied: Mutex<Vec<(String, i64)>>,
    pub initialized: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl Default for FakeReplication {
    fn default() -> Self {
        Self {
            state: Mutex::new(HaState::Consistent),
            applied: Mutex::new(Vec::new()),
            initialized: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }
}

impl FakeReplication {
    pub fn set_state(&self, state: HaState) {
        *lock(&self.state) = state;
    }

    /// Versions of the configs applied, per replica.
    pub fn applied(&self) -> Vec<(String, i64)> {
        lock(&self.applied).clone()
    }

    pub fn initialized(&self) -> Vec<String> {
        lock(&self.initialized).clone()
    }
}

#[async_trait]
impl ReplicationExecutor for FakeReplication {
    async fn apply_config(&self, replica: &LocalVolumeReplica, config: &VolumeConfig) -> agent::Result<()> {
        lock(&self.applied).push((replica.metadata.name.clone(), config.version));
        Ok(())
    }

    async fn initialize(&self, replica: &LocalVolumeReplica, _config: &VolumeConfig) -> agent::Result<()> {
        lock(&self.initialized).push(replica.spec.volume_name.clone());
        Ok(())
    }

    async fn delete_config(&self, replica: &LocalVolumeReplica) -> agent::Result<()> {
        lock(&self.deleted).push(replica.spec.volume_name.clone());
        Ok(())
    }

    async fn ha_state(&self, _replica: &LocalVolumeReplica) -> agent::Result<HaState> {
        Ok(*lock(&self.state))
    }
}

/// Device limits applied, in call order.
#[derive(Default)]
pub struct FakeQos {
    pub applied: Mutex<Vec<(String, IoLimits)>>,
}

impl FakeQos {
    pub fn applied(&self) -> Vec<(String, IoLimits)> {
        lock(&self.applied).clone()
    }
}

#[async_trait]
impl QosExecutor for FakeQos {
    async fn apply(&self, device_path: &str, limits: IoLimits) -> agent::Result<()> {
        lock(&self.applied).push((device_path.to_string(), limits));
        Ok(())
    }
}

/// Executors of one fake host, with handles to inspect the calls made.
pub struct FakeHost {
    pub executors: Executors,
    pub pools: Arc<FakePools>,
    pub volumes: Arc<FakeVolumes>,
    pub replication: Arc<FakeReplication>,
    pub qos: Arc<FakeQos>,
}

impl FakeHost {
    pub fn new(capacity: i64) -> Self {
        let pools = Arc::new(FakePools::new(capacity));
        let volumes = Arc::new(FakeVolumes::default());
        let replication = Arc::new(FakeReplication::default());
        let qos = Arc::new(FakeQos::default());
        let mut by_kind: HashMap<VolumeKind, Arc<dyn VolumeExecutor>> = HashMap::new();
        by_kind.insert(VolumeKind::Lvm, volumes.clone());
        Self {
            executors: Executors {
                pools: pools.clone(),
                volumes: by_kind,
                replication: replication.clone(),
                qos: qos.clone(),
            },
            pools,
            volumes,
            replication,
            qos,
        }
    }
}

/// Answers host commands from a table and records every invocation.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Output for commands whose rendered line starts with `prefix`.
    pub fn respond(&self, prefix: &str, stdout: &str) {
        lock(&self.responses).insert(
            prefix.to_string(),
            CommandOutput {
                code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn fail(&self, prefix: &str, code: i32, stderr: &str) {
        lock(&self.responses).insert(
            prefix.to_string(),
            CommandOutput {
                code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> system::Result<CommandOutput> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        lock(&self.calls).push(line.clone());

        let responses = lock(&self.responses);
        let best = responses
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, output)| output.clone());
        Ok(best.unwrap_or_default())
    }
}
