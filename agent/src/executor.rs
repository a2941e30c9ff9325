use apis::{LocalDevice, LocalPool, LocalVolumeReplica, LocalVolumeReplicaStatus, VolumeKind};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use system::CommandRunner;

use crate::drbd::DrbdExecutor;
use crate::lvm::LvmExecutor;
use crate::qos::{CgroupQos, QosExecutor, DEFAULT_CGROUP_ROOT};
use crate::replication::ReplicationExecutor;
use crate::{DrbdConfig, Result};

/// A backing volume found on the host, keyed by volume name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostVolume {
    pub name: String,
    pub pool_name: String,
    pub path: String,
    pub capacity_bytes: i64,
}

/// Discovers and grows the storage pools of this node.
#[async_trait]
pub trait PoolExecutor: Send + Sync {
    async fn get_pools(&self) -> Result<BTreeMap<String, LocalPool>>;

    async fn get_volumes(&self) -> Result<HashMap<String, HostVolume>>;

    /// Adds the disks to the pool of their class. Returns whether any pool
    /// gained a disk.
    async fn extend_pools(&self, disks: &[LocalDevice]) -> Result<bool>;
}

/// Materializes the first-layer backing of a replica. Every call returns the
/// replica status as it should be after the call.
#[async_trait]
pub trait VolumeExecutor: Send + Sync {
    /// Idempotent: a backing that already exists is reported, not recreated.
    async fn create_volume_replica(&self, replica: &LocalVolumeReplica) -> Result<LocalVolumeReplicaStatus>;

    async fn expand_volume_replica(
        &self,
        replica: &LocalVolumeReplica,
        capacity_bytes: i64,
    ) -> Result<LocalVolumeReplicaStatus>;

    async fn delete_volume_replica(&self, replica: &LocalVolumeReplica) -> Result<()>;

    async fn test_volume_replica(&self, replica: &LocalVolumeReplica) -> Result<LocalVolumeReplicaStatus>;
}

/// The executors a node agent drives.
#[derive(Clone)]
pub struct Executors {
    pub pools: Arc<dyn PoolExecutor>,
    pub volumes: HashMap<VolumeKind, Arc<dyn VolumeExecutor>>,
    pub replication: Arc<dyn ReplicationExecutor>,
    pub qos: Arc<dyn QosExecutor>,
}

impl Executors {
    /// LVM pools and volumes with DRBD replication, all through `runner`,
    /// throttled through the host cgroups.
    pub fn host(runner: Arc<dyn CommandRunner>, drbd: DrbdConfig, hostname: &str) -> Self {
        let lvm = Arc::new(LvmExecutor::new(runner.clone()));
        let mut volumes: HashMap<VolumeKind, Arc<dyn VolumeExecutor>> = HashMap::new();
        volumes.insert(VolumeKind::Lvm, lvm.clone());
        Self {
            pools: lvm,
            volumes,
            replication: Arc::new(DrbdExecutor::new(runner, drbd, hostname)),
            qos: Arc::new(CgroupQos::new(DEFAULT_CGROUP_ROOT)),
        }
    }

    pub fn volume_executor(&self, kind: VolumeKind) -> Option<Arc<dyn VolumeExecutor>> {
        self.volumes.get(&kind).cloned()
    }
}
