use apis::{
    Api, LocalDiskClaimSpec, LocalPool, LocalStorageNode, LocalVolumeReplica, NodeState,
    ReplicaState, StorageNodeCondition,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::executor::PoolExecutor;
use crate::{AgentError, Result};

const STATUS_UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
struct Registered {
    pool: String,
    allocated_bytes: i64,
}

#[derive(Debug, Default)]
struct RegistryState {
    pools: BTreeMap<String, LocalPool>,
    /// volume name -> what the pool accounts for it
    volumes: HashMap<String, Registered>,
}

/// Pool accounting of this node, mirrored into its storage node record.
pub struct Registry {
    node_name: String,
    nodes: Api<LocalStorageNode>,
    executor: Arc<dyn PoolExecutor>,
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new(node_name: &str, nodes: Api<LocalStorageNode>, executor: Arc<dyn PoolExecutor>) -> Self {
        Self {
            node_name: node_name.to_string(),
            nodes,
            executor,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Rediscovers pools and volumes from the host and publishes them.
    pub async fn sync_node_resources(&self) -> Result<()> {
        let pools = self.executor.get_pools().await?;
        let volumes = self.executor.get_volumes().await?;

        let mut state = self.state.lock().await;
        state.pools = pools;
        state.volumes = volumes
            .into_values()
            .map(|v| {
                (
                    v.name,
                    Registered {
                        pool: v.pool_name,
                        allocated_bytes: v.capacity_bytes,
                    },
                )
            })
            .collect();
        debug!(
            node = %self.node_name,
            "Rebuilt registry: {} pools, {} volumes",
            state.pools.len(),
            state.volumes.len()
        );
        self.sync_to_node(&state.pools).await
    }

    pub async fn pools(&self) -> BTreeMap<String, LocalPool> {
        self.state.lock().await.pools.clone()
    }

    pub async fn has_disks(&self) -> bool {
        self.state.lock().await.pools.values().any(|p| !p.disks.is_empty())
    }

    pub async fn is_registered(&self, volume: &str) -> bool {
        self.state.lock().await.volumes.contains_key(volume)
    }

    /// Accounts a replica according to its state: Ready and NotReady replicas
    /// occupy their pool, Deleted ones release it.
    pub async fn update_for_replica(&self, replica: &LocalVolumeReplica) -> Result<()> {
        match replica.status.state {
            ReplicaState::Ready | ReplicaState::NotReady => self.register(replica).await,
            ReplicaState::Deleted => self.deregister(replica).await,
            _ => Ok(()),
        }
    }

    async fn register(&self, replica: &LocalVolumeReplica) -> Result<()> {
        let mut guard = self.state.lock().await;
        let RegistryState { pools, volumes } = &mut *guard;
        let volume = &replica.spec.volume_name;
        let allocated = replica.status.allocated_capacity_bytes;

        let Some(pool) = pools.get_mut(&replica.spec.pool_name) else {
            warn!(replica = %replica.metadata.name, pool = %replica.spec.pool_name, "Replica pool not found, skip registration");
            return Ok(());
        };

        if let Some(old) = volumes.get(volume) {
            if old.allocated_bytes == allocated {
                return Ok(());
            }
            pool.free_capacity_bytes += old.allocated_bytes;
            pool.used_capacity_bytes -= old.allocated_bytes;
            pool.free_volume_count += 1;
            pool.used_volume_count -= 1;
        }

        pool.free_capacity_bytes -= allocated;
        pool.used_capacity_bytes += allocated;
        pool.free_volume_count -= 1;
        pool.used_volume_count += 1;
        if !pool.volumes.contains(volume) {
            pool.volumes.push(volume.clone());
        }
        volumes.insert(
            volume.clone(),
            Registered {
                pool: replica.spec.pool_name.clone(),
                allocated_bytes: allocated,
            },
        );
        debug!(replica = %replica.metadata.name, allocated, "Registered replica");

        let pools = pools.clone();
        drop(guard);
        self.sync_to_node(&pools).await
    }

    async fn deregister(&self, replica: &LocalVolumeReplica) -> Result<()> {
        let mut guard = self.state.lock().await;
        let RegistryState { pools, volumes } = &mut *guard;
        let volume = &replica.spec.volume_name;

        let Some(registered) = volumes.remove(volume) else {
            return Ok(());
        };
        if let Some(pool) = pools.get_mut(&registered.pool) {
            pool.free_capacity_bytes += registered.allocated_bytes;
            pool.used_capacity_bytes -= registered.allocated_bytes;
            pool.free_volume_count += 1;
            pool.used_volume_count -= 1;
            pool.volumes.retain(|v| v != volume);
        }
        debug!(replica = %replica.metadata.name, "Deregistered replica");

        let pools = pools.clone();
        drop(guard);
        self.sync_to_node(&pools).await
    }

    async fn sync_to_node(&self, pools: &BTreeMap<String, LocalPool>) -> Result<()> {
        self.update_node_status(|node| {
            node.status.state = NodeState::Ready;
            node.status.pools = pools.clone();
        })
        .await
    }

    pub async fn update_condition(&self, condition: StorageNodeCondition) -> Result<()> {
        self.update_node_status(|node| node.status.set_condition(condition.clone()))
            .await
    }

    pub async fn update_pool_extend_record(&self, pool: &str, record: &LocalDiskClaimSpec) -> Result<()> {
        self.update_node_status(|node| {
            let records = node.status.pool_extend_records.entry(pool.to_string()).or_default();
            if !records.contains(record) {
                records.push(record.clone());
            }
        })
        .await
    }

    async fn update_node_status<F>(&self, mutate: F) -> Result<()>
    where
        F: Fn(&mut LocalStorageNode),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(mut node) = self.nodes.get_opt(&self.node_name).await? else {
                return Err(AgentError::NodeNotFound(self.node_name.clone()));
            };
            let before = node.status.clone();
            mutate(&mut node);
            if node.status == before {
                return Ok(());
            }
            match self.nodes.update_status(&node).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() && attempt < STATUS_UPDATE_ATTEMPTS => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
