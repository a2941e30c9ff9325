use apis::{LocalStorageNode, LocalVolume, NodeState, VolumeKind};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// Tally key used for RAM volumes, which draw from the node's RAM budget
/// instead of a disk pool.
pub const RAM_POOL: &str = "RAM";

/// Per-node capacity and volume count of one pool.
#[derive(Debug, Clone, Default)]
pub struct PoolTally {
    pub capacities: HashMap<String, i64>,
    pub volume_count: HashMap<String, i64>,
}

/// kind -> pool name -> per-node tallies.
#[derive(Debug, Clone, Default)]
pub struct StorageCollection {
    pub kinds: HashMap<VolumeKind, HashMap<String, PoolTally>>,
}

impl StorageCollection {
    pub fn capacity(&self, kind: VolumeKind, pool: &str, node: &str) -> i64 {
        self.tally(kind, pool)
            .and_then(|t| t.capacities.get(node).copied())
            .unwrap_or(0)
    }

    pub fn volume_count(&self, kind: VolumeKind, pool: &str, node: &str) -> i64 {
        self.tally(kind, pool)
            .and_then(|t| t.volume_count.get(node).copied())
            .unwrap_or(0)
    }

    fn tally(&self, kind: VolumeKind, pool: &str) -> Option<&PoolTally> {
        self.kinds.get(&kind).and_then(|pools| pools.get(pool))
    }

    fn tally_mut(&mut self, kind: VolumeKind, pool: &str) -> &mut PoolTally {
        self.kinds
            .entry(kind)
            .or_default()
            .entry(pool.to_string())
            .or_default()
    }

    fn set(&mut self, kind: VolumeKind, pool: &str, node: &str, capacity: i64, count: i64) {
        let tally = self.tally_mut(kind, pool);
        tally.capacities.insert(node.to_string(), capacity);
        tally.volume_count.insert(node.to_string(), count);
    }

    fn add(&mut self, kind: VolumeKind, pool: &str, node: &str, capacity: i64, count: i64) {
        let tally = self.tally_mut(kind, pool);
        *tally.capacities.entry(node.to_string()).or_insert(0) += capacity;
        *tally.volume_count.entry(node.to_string()).or_insert(0) += count;
    }

    fn drop_node(&mut self, node: &str) {
        for pools in self.kinds.values_mut() {
            for tally in pools.values_mut() {
                tally.capacities.remove(node);
                tally.volume_count.remove(node);
            }
        }
    }
}

pub(crate) fn tally_pool(kind: VolumeKind, pool_name: &str) -> &str {
    match kind {
        VolumeKind::Ram => RAM_POOL,
        _ => pool_name,
    }
}

/// Everything the scheduler knows, guarded by one lock in `Scheduler`.
#[derive(Debug, Default)]
pub(crate) struct Resources {
    pub initialized: bool,
    pub max_ha_volume_count: i32,
    pub allocated_ids: HashMap<String, i32>,
    pub free_ids: VecDeque<i32>,
    pub total: StorageCollection,
    pub allocated: StorageCollection,
    pub nodes: BTreeMap<String, LocalStorageNode>,
}

impl Resources {
    pub fn new(max_ha_volume_count: i32) -> Self {
        Self {
            max_ha_volume_count,
            ..Default::default()
        }
    }

    pub fn initialize(&mut self, volumes: &[LocalVolume], nodes: &[LocalStorageNode]) {
        self.allocated_ids.clear();
        self.free_ids.clear();
        self.total = StorageCollection::default();
        self.allocated = StorageCollection::default();
        self.nodes.clear();

        for vol in volumes {
            let Some(config) = &vol.spec.config else {
                continue;
            };
            if config.resource_id < 0 || vol.status.state == apis::VolumeState::Deleted {
                continue;
            }
            if !config.convertible && config.replicas.len() < 2 {
                continue;
            }
            // a second holder of an ID is left without one and gets reassigned
            if self.allocated_ids.values().any(|id| *id == config.resource_id) {
                continue;
            }
            self.allocated_ids.insert(vol.metadata.name.clone(), config.resource_id);
        }
        let used: std::collections::HashSet<i32> = self.allocated_ids.values().copied().collect();
        self.free_ids = (0..self.max_ha_volume_count).filter(|id| !used.contains(id)).collect();

        for node in nodes {
            self.sync_node(node);
        }
        for vol in volumes {
            if vol.status.state != apis::VolumeState::Deleted {
                self.add_allocated(vol);
            }
        }
        self.initialized = true;

        debug!(
            "Scheduler initialized: {} nodes, {} HA volumes, {} free resource IDs",
            self.nodes.len(),
            self.allocated_ids.len(),
            self.free_ids.len()
        );
    }

    /// Ready nodes contribute their pools; any other state withdraws the node.
    pub fn sync_node(&mut self, node: &LocalStorageNode) {
        if node.status.state != NodeState::Ready {
            self.remove_node(&node.metadata.name);
            return;
        }

        let name = node.metadata.name.clone();
        self.total.drop_node(&name);
        for pool in node.status.pools.values() {
            for kind in [VolumeKind::Lvm, VolumeKind::Disk] {
                if node.spec.allows_kind(kind) {
                    self.total
                        .set(kind, &pool.name, &name, pool.total_capacity_bytes, pool.total_volume_count);
                }
            }
        }
        if node.spec.allows_kind(VolumeKind::Ram) {
            self.total
                .set(VolumeKind::Ram, RAM_POOL, &name, node.spec.ram_disk_total_capacity, i64::MAX);
        }
        self.nodes.insert(name, node.clone());
    }

    pub fn remove_node(&mut self, name: &str) {
        self.total.drop_node(name);
        self.nodes.remove(name);
    }

    pub fn add_allocated(&mut self, vol: &LocalVolume) {
        self.account(vol, 1);
    }

    pub fn recycle_allocated(&mut self, vol: &LocalVolume) {
        self.account(vol, -1);
    }

    fn account(&mut self, vol: &LocalVolume, sign: i64) {
        let Some(config) = &vol.spec.config else {
            return;
        };
        let pool = tally_pool(vol.spec.volume_kind, &vol.spec.pool_name).to_string();
        for replica in &config.replicas {
            self.allocated.add(
                vol.spec.volume_kind,
                &pool,
                &replica.hostname,
                sign * config.required_capacity_bytes,
                sign,
            );
        }
    }

    pub fn allocate_resource_id(&mut self, volume: &str) -> Option<i32> {
        if let Some(id) = self.allocated_ids.get(volume) {
            return Some(*id);
        }
        let id = self.free_ids.pop_front()?;
        self.allocated_ids.insert(volume.to_string(), id);
        Some(id)
    }

    /// Takes `id` out of the free list for a volume that already carries it.
    /// Fails when the ID is held by another volume.
    pub fn reserve_resource_id(&mut self, volume: &str, id: i32) -> bool {
        if let Some(held) = self.allocated_ids.get(volume) {
            return *held == id;
        }
        let Some(pos) = self.free_ids.iter().position(|free| *free == id) else {
            return false;
        };
        self.free_ids.remove(pos);
        self.allocated_ids.insert(volume.to_string(), id);
        true
    }

    pub fn recycle_resource_id(&mut self, volume: &str) {
        if let Some(id) = self.allocated_ids.remove(volume) {
            debug!("Recycled resource ID {} of volume {}", id, volume);
            self.free_ids.push_back(id);
        }
    }
}
