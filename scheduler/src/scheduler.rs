use apis::{
    Informer, LocalStorageNode, LocalVolume, VolumeConfig, VolumeKind, VolumeReplicaEntry,
    VolumeState, WatchEvent,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::resources::{tally_pool, Resources};
use crate::{Config, Result, SchedulerError};

/// Places volume replicas on nodes and hands out replication resource IDs.
///
/// All state lives in memory and is rebuilt by [`Scheduler::init`]; event
/// handlers are no-ops until then. Nothing here touches the record store.
pub struct Scheduler {
    resources: Mutex<Resources>,
}

impl Scheduler {
    pub fn new(config: Config) -> Self {
        Self {
            resources: Mutex::new(Resources::new(config.max_ha_volume_count)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Resources> {
        match self.resources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn init(&self, volumes: &[LocalVolume], nodes: &[LocalStorageNode]) {
        info!(
            "Initializing scheduler with {} volumes and {} nodes",
            volumes.len(),
            nodes.len()
        );
        self.lock().initialize(volumes, nodes);
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn on_node_update(&self, node: &LocalStorageNode) {
        let mut res = self.lock();
        if res.initialized {
            res.sync_node(node);
        }
    }

    pub fn on_node_delete(&self, node: &LocalStorageNode) {
        let mut res = self.lock();
        if res.initialized {
            res.remove_node(&node.metadata.name);
        }
    }

    /// A volume that arrives with a config, as a recreated record does,
    /// claims its capacity and resource ID again. An ID another volume took
    /// in the meantime stays with that volume; see [`Scheduler::reassign_resource_id`].
    pub fn on_volume_add(&self, vol: &LocalVolume) {
        let mut res = self.lock();
        if !res.initialized || vol.status.state == VolumeState::Deleted {
            return;
        }
        let Some(config) = &vol.spec.config else {
            return;
        };
        res.add_allocated(vol);
        if config.resource_id >= 0
            && (config.convertible || config.replicas.len() >= 2)
            && !res.reserve_resource_id(&vol.metadata.name, config.resource_id)
        {
            warn!(
                "Volume {}: resource ID {} is held by another volume",
                vol.metadata.name, config.resource_id
            );
        }
    }

    pub fn on_volume_update(&self, old: &LocalVolume, new: &LocalVolume) {
        let mut res = self.lock();
        if !res.initialized {
            return;
        }
        if old.status.state != VolumeState::Deleted {
            res.recycle_allocated(old);
        }
        if new.status.state == VolumeState::Deleted {
            res.recycle_resource_id(&new.metadata.name);
            return;
        }
        res.add_allocated(new);

        let keeps_id = new
            .spec
            .config
            .as_ref()
            .map(|c| c.convertible || c.replicas.len() >= 2)
            .unwrap_or(false);
        if !keeps_id {
            res.recycle_resource_id(&new.metadata.name);
        }
    }

    /// A record removed without passing through `Deleted` releases its
    /// capacity but keeps its ID until it is recreated.
    pub fn on_volume_delete(&self, vol: &LocalVolume) {
        let mut res = self.lock();
        if !res.initialized {
            return;
        }
        if vol.status.state == VolumeState::Deleted {
            res.recycle_resource_id(&vol.metadata.name);
        } else {
            res.recycle_allocated(vol);
        }
    }

    /// Wires the handlers onto shared informers.
    pub fn register_handlers(
        self: &Arc<Self>,
        nodes: &Informer<LocalStorageNode>,
        volumes: &Informer<LocalVolume>,
    ) {
        let scheduler = self.clone();
        nodes.add_handler(Box::new(move |event: &WatchEvent<LocalStorageNode>| {
            match event {
                WatchEvent::Added(node) => scheduler.on_node_update(node),
                WatchEvent::Updated { new, .. } => scheduler.on_node_update(new),
                WatchEvent::Deleted(node) => scheduler.on_node_delete(node),
            }
        }));

        let scheduler = self.clone();
        volumes.add_handler(Box::new(move |event: &WatchEvent<LocalVolume>| {
            match event {
                WatchEvent::Added(vol) => scheduler.on_volume_add(vol),
                WatchEvent::Updated { old, new } => scheduler.on_volume_update(old, new),
                WatchEvent::Deleted(vol) => scheduler.on_volume_delete(vol),
            }
        }));
    }

    pub fn predicate(&self, vol: &LocalVolume, node: &str) -> Result<()> {
        predicate(&self.lock(), vol, node)
    }

    pub fn score(&self, vol: &LocalVolume, node: &str) -> i64 {
        score(&self.lock(), vol, node)
    }

    /// Capacity not yet promised to any volume config.
    pub fn free_capacity(&self, kind: VolumeKind, pool: &str, node: &str) -> i64 {
        let res = self.lock();
        let pool = tally_pool(kind, pool);
        res.total.capacity(kind, pool, node) - res.allocated.capacity(kind, pool, node)
    }

    pub fn allocated_capacity(&self, kind: VolumeKind, pool: &str, node: &str) -> i64 {
        self.lock().allocated.capacity(kind, tally_pool(kind, pool), node)
    }

    pub fn allocated_volume_count(&self, kind: VolumeKind, pool: &str, node: &str) -> i64 {
        self.lock().allocated.volume_count(kind, tally_pool(kind, pool), node)
    }

    pub fn resource_id(&self, volume: &str) -> Option<i32> {
        self.lock().allocated_ids.get(volume).copied()
    }

    pub fn free_resource_ids(&self) -> usize {
        self.lock().free_ids.len()
    }

    /// Ordered placement candidates. Required accessibility nodes come first
    /// and must pass the predicate; the rest are ranked by score, ties kept
    /// in node-name order.
    pub fn get_node_candidates(&self, vol: &LocalVolume) -> Result<Vec<LocalStorageNode>> {
        let res = self.lock();
        if !res.initialized {
            return Err(SchedulerError::NotInitialized);
        }

        let mut excluded: HashSet<String> = vol.config_nodes().into_iter().collect();
        let mut candidates = Vec::new();

        for name in &vol.spec.accessibility.nodes {
            if name.is_empty() || excluded.contains(name) {
                continue;
            }
            predicate(&res, vol, name)?;
            if let Some(node) = res.nodes.get(name) {
                debug!("Volume {}: required node {} is a candidate", vol.metadata.name, name);
                candidates.push(node.clone());
            }
            excluded.insert(name.clone());
        }

        let mut ranked: Vec<(i64, &LocalStorageNode)> = Vec::new();
        for (name, node) in &res.nodes {
            if excluded.contains(name) {
                continue;
            }
            if let Err(e) = predicate(&res, vol, name) {
                debug!("Volume {}: node {} filtered out: {}", vol.metadata.name, name, e);
                continue;
            }
            ranked.push((score(&res, vol, name), node));
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.extend(ranked.into_iter().map(|(_, node)| node.clone()));

        Ok(candidates)
    }

    /// Computes the volume config for `vol`, placing any replicas it still
    /// lacks.
    pub fn allocate(&self, vol: &LocalVolume) -> Result<VolumeConfig> {
        let existing = vol.spec.config.as_ref().map(|c| c.replicas.len()).unwrap_or(0);
        let needed = (vol.spec.replica_number.max(0) as usize).saturating_sub(existing);

        let mut nodes = Vec::new();
        if needed > 0 {
            let candidates = self.get_node_candidates(vol)?;
            if candidates.len() < needed {
                warn!(
                    "Volume {}: need {} nodes, only {} available",
                    vol.metadata.name,
                    needed,
                    candidates.len()
                );
                return Err(SchedulerError::NotEnoughNodes {
                    needed,
                    found: candidates.len(),
                });
            }
            nodes = candidates.into_iter().take(needed).collect();
        }

        self.configure_volume_on_additional_nodes(vol, &nodes)
    }

    /// Extends the volume's config with one replica per node in `nodes`.
    pub fn configure_volume_on_additional_nodes(
        &self,
        vol: &LocalVolume,
        nodes: &[LocalStorageNode],
    ) -> Result<VolumeConfig> {
        if nodes.is_empty() {
            if let Some(config) = &vol.spec.config {
                let mut config = config.clone();
                if config.required_capacity_bytes < vol.spec.required_capacity_bytes {
                    config.required_capacity_bytes = vol.spec.required_capacity_bytes;
                }
                return Ok(config);
            }
        }

        let resource_id = self.resource_id_for(vol)?;

        let mut config = match &vol.spec.config {
            Some(config) => {
                let mut config = config.clone();
                config.version += 1;
                config
            }
            None => VolumeConfig {
                version: 1,
                volume_name: vol.metadata.name.clone(),
                ..Default::default()
            },
        };
        config.resource_id = resource_id;
        config.required_capacity_bytes = vol.spec.required_capacity_bytes;
        config.convertible = vol.spec.convertible;

        let used: HashSet<i64> = config.replicas.iter().map(|r| r.id).collect();
        let free_slots = (1..=vol.spec.replica_number).filter(|id| !used.contains(id));
        let primary_node = vol.spec.accessibility.nodes.first();

        for (id, node) in free_slots.zip(nodes) {
            config.replicas.push(VolumeReplicaEntry {
                id,
                hostname: node.spec.hostname.clone(),
                ip: node.spec.storage_ip.clone(),
                primary: primary_node == Some(&node.spec.hostname),
            });
        }
        if primary_node.is_none() {
            if let Some(first) = config.replicas.first_mut() {
                first.primary = true;
            }
        }
        if config.replicas.len() < 2 {
            config.initialized = false;
        }

        debug!(
            "Volume {}: config v{} resource {} on {:?}",
            vol.metadata.name,
            config.version,
            config.resource_id,
            config.nodes()
        );
        Ok(config)
    }

    /// A fresh config for an HA volume whose configured resource ID is not
    /// the one held for it, or `None` when the two agree.
    pub fn reassign_resource_id(&self, vol: &LocalVolume) -> Result<Option<VolumeConfig>> {
        let Some(config) = &vol.spec.config else {
            return Ok(None);
        };
        if config.resource_id < 0 || self.resource_id(&vol.metadata.name) == Some(config.resource_id) {
            return Ok(None);
        }
        let id = self.resource_id_for(vol)?;
        info!(
            "Volume {}: resource ID {} reassigned to {}",
            vol.metadata.name, config.resource_id, id
        );
        let mut config = config.clone();
        config.resource_id = id;
        config.version += 1;
        Ok(Some(config))
    }

    fn resource_id_for(&self, vol: &LocalVolume) -> Result<i32> {
        let mut res = self.lock();
        if !vol.is_ha() {
            res.recycle_resource_id(&vol.metadata.name);
            return Ok(-1);
        }
        if !res.allocated_ids.contains_key(&vol.metadata.name)
            && res.allocated_ids.len() >= res.max_ha_volume_count.max(0) as usize
        {
            return Err(SchedulerError::MaxVolumesExceeded);
        }
        res.allocate_resource_id(&vol.metadata.name)
            .ok_or(SchedulerError::MaxVolumesExceeded)
    }
}

fn predicate(res: &Resources, vol: &LocalVolume, node_name: &str) -> Result<()> {
    let node = res
        .nodes
        .get(node_name)
        .ok_or_else(|| SchedulerError::NodeNotFound(node_name.to_string()))?;

    let kind = vol.spec.volume_kind;
    if !node.spec.allows_kind(kind) {
        return Err(SchedulerError::KindNotAllowed {
            node: node_name.to_string(),
            kind,
        });
    }

    let pool = tally_pool(kind, &vol.spec.pool_name);
    let required = vol.spec.required_capacity_bytes;
    let free = res.total.capacity(kind, pool, node_name) - res.allocated.capacity(kind, pool, node_name);
    if required > free {
        return Err(SchedulerError::NotEnoughCapacity {
            node: node_name.to_string(),
            pool: pool.to_string(),
            required,
            free,
        });
    }

    if res.allocated.volume_count(kind, pool, node_name) >= res.total.volume_count(kind, pool, node_name) {
        return Err(SchedulerError::NotEnoughVolumeCount {
            node: node_name.to_string(),
            pool: pool.to_string(),
        });
    }

    if kind == VolumeKind::Disk {
        if let Some(limit) = node
            .status
            .pools
            .get(&vol.spec.pool_name)
            .map(|p| p.volume_capacity_bytes_limit)
        {
            if limit > 0 && required > limit {
                return Err(SchedulerError::VolumeTooLarge {
                    node: node_name.to_string(),
                    pool: pool.to_string(),
                    required,
                    limit,
                });
            }
        }
    }
    Ok(())
}

fn score(res: &Resources, vol: &LocalVolume, node_name: &str) -> i64 {
    let kind = vol.spec.volume_kind;
    let pool = tally_pool(kind, &vol.spec.pool_name);
    let free = res.total.capacity(kind, pool, node_name) - res.allocated.capacity(kind, pool, node_name);
    if free <= 0 {
        return 0;
    }
    ((1.0 - vol.spec.required_capacity_bytes as f64 / free as f64) * 100.0) as i64
}
