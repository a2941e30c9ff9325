use apis::{
    Api, Informer, LocalVolume, LocalVolumeGroup, ObjectKey, PersistentVolumeClaim, Pod,
    RecordStore, StorageClass, VolumeInfo, VolumeState, WatchEvent, CSI_DRIVER_NAME,
    VOLUME_GROUP_FINALIZER,
};
use coordination::{run_worker, TaskQueue};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::index::GroupIndex;
use crate::{Config, GroupError, Result};

/// Keeps volume groups in step with their volumes, claims and pods.
///
/// Watch handlers only enqueue; four workers (group, volume, claim, pod) do
/// the reconciliation. The reverse index is guarded by one lock that is held
/// across the record write, so index cleanup and finalizer removal happen
/// together.
pub struct VolumeGroupManager {
    store: Arc<dyn RecordStore>,
    groups: Api<LocalVolumeGroup>,
    volumes: Api<LocalVolume>,
    classes: Api<StorageClass>,
    index: Mutex<GroupIndex>,
    group_queue: Arc<TaskQueue<String>>,
    volume_queue: Arc<TaskQueue<String>>,
    claim_queue: Arc<TaskQueue<ObjectKey>>,
    pod_queue: Arc<TaskQueue<ObjectKey>>,
}

impl VolumeGroupManager {
    pub fn new(store: Arc<dyn RecordStore>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            groups: Api::all(store.clone()),
            volumes: Api::all(store.clone()),
            classes: Api::all(store.clone()),
            store,
            index: Mutex::new(GroupIndex::default()),
            group_queue: TaskQueue::new("VolumeGroupQueue", config.queue),
            volume_queue: TaskQueue::new("LocalVolumeQueue", config.queue),
            claim_queue: TaskQueue::new("PVCQueue", config.queue),
            pod_queue: TaskQueue::new("PodQueue", config.queue),
        })
    }

    pub fn register_handlers(
        &self,
        groups: &Informer<LocalVolumeGroup>,
        volumes: &Informer<LocalVolume>,
        claims: &Informer<PersistentVolumeClaim>,
        pods: &Informer<Pod>,
    ) {
        let queue = self.group_queue.clone();
        groups.add_handler(Box::new(move |event: &WatchEvent<LocalVolumeGroup>| {
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.volume_queue.clone();
        volumes.add_handler(Box::new(move |event: &WatchEvent<LocalVolume>| {
            queue.add(event.object().metadata.name.clone());
        }));

        let queue = self.claim_queue.clone();
        claims.add_handler(Box::new(move |event: &WatchEvent<PersistentVolumeClaim>| {
            match event {
                WatchEvent::Updated { new, .. } if !new.metadata.is_deleting() => {}
                _ => queue.add(event.object().metadata.key()),
            }
        }));

        let queue = self.pod_queue.clone();
        pods.add_handler(Box::new(move |event: &WatchEvent<Pod>| match event {
            WatchEvent::Updated { new, .. } if !new.metadata.is_deleting() => {}
            _ => queue.add(event.object().metadata.key()),
        }));
    }

    /// Runs the four workers until [`shutdown`](Self::shutdown).
    pub async fn run(self: Arc<Self>) {
        info!("Starting volume group manager");
        let manager = self.clone();
        let groups = run_worker(self.group_queue.clone(), move |name: String| {
            let manager = manager.clone();
            async move { manager.process_group(&name).await }
        });
        let manager = self.clone();
        let volumes = run_worker(self.volume_queue.clone(), move |name: String| {
            let manager = manager.clone();
            async move { manager.process_volume(&name).await }
        });
        let manager = self.clone();
        let claims = run_worker(self.claim_queue.clone(), move |key: ObjectKey| {
            let manager = manager.clone();
            async move { manager.process_claim(&key).await }
        });
        let manager = self.clone();
        let pods = run_worker(self.pod_queue.clone(), move |key: ObjectKey| {
            let manager = manager.clone();
            async move { manager.process_pod(&key).await }
        });
        tokio::join!(groups, volumes, claims, pods);
        info!("Volume group manager stopped");
    }

    pub fn shutdown(&self) {
        self.group_queue.shutdown();
        self.volume_queue.shutdown();
        self.claim_queue.shutdown();
        self.pod_queue.shutdown();
    }

    pub async fn index(&self) -> GroupIndex {
        self.index.lock().await.clone()
    }

    pub async fn group_name_for_volume(&self, volume: &str) -> Option<String> {
        self.index.lock().await.volumes.get(volume).cloned()
    }

    pub async fn group_name_for_claim(&self, namespace: &str, claim: &str) -> Option<String> {
        self.index
            .lock()
            .await
            .claims
            .get(&ObjectKey::new(namespace, claim))
            .cloned()
    }

    pub async fn group_by_name(&self, name: &str) -> Result<Option<LocalVolumeGroup>> {
        Ok(self.groups.get_opt(name).await?)
    }

    pub async fn group_by_volume(&self, volume: &str) -> Result<Option<LocalVolumeGroup>> {
        match self.group_name_for_volume(volume).await {
            Some(name) => self.group_by_name(&name).await,
            None => Ok(None),
        }
    }

    /// Looks through the index first, then through the stored groups of the
    /// claim's namespace.
    pub async fn group_by_claim(&self, namespace: &str, claim: &str) -> Result<Option<LocalVolumeGroup>> {
        if let Some(name) = self.group_name_for_claim(namespace, claim).await {
            if let Some(group) = self.group_by_name(&name).await? {
                return Ok(Some(group));
            }
        }
        Ok(self
            .groups
            .list()
            .await?
            .into_iter()
            .find(|g| g.spec.namespace == namespace && g.has_pvc(claim)))
    }

    pub async fn volumes_of_group(&self, group: &LocalVolumeGroup) -> Result<Vec<LocalVolume>> {
        if group.spec.volumes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .volumes
            .list()
            .await?
            .into_iter()
            .filter(|v| v.spec.volume_group == group.metadata.name)
            .collect())
    }

    /// Whether the claim's storage class is served by this driver.
    pub async fn is_driver_claim(&self, claim: &PersistentVolumeClaim) -> Result<bool> {
        if claim.spec.storage_class_name.is_empty() {
            return Ok(false);
        }
        Ok(self
            .classes
            .get_opt(&claim.spec.storage_class_name)
            .await?
            .map_or(false, |sc| sc.provisioner == CSI_DRIVER_NAME))
    }

    pub async fn process_group(&self, name: &str) -> Result<()> {
        let Some(group) = self.groups.get_opt(name).await? else {
            self.index.lock().await.remove_group(name);
            return Ok(());
        };

        if group.metadata.is_deleting() {
            self.release_group(group).await
        } else if group.spec.volumes.is_empty() {
            self.delete_group(group).await
        } else {
            self.add_group(group).await
        }
    }

    async fn add_group(&self, mut group: LocalVolumeGroup) -> Result<()> {
        if group.metadata.add_finalizer(VOLUME_GROUP_FINALIZER) {
            debug!(group = %group.metadata.name, "Adding group finalizer");
            self.groups.update(&group).await?;
            return Ok(());
        }

        self.index.lock().await.insert_group(&group);
        self.update_group_accessibility(&group).await
    }

    /// Aligns the group's node set with where its volumes' replicas live.
    async fn update_group_accessibility(&self, group: &LocalVolumeGroup) -> Result<()> {
        let volumes = self.volumes_of_group(group).await?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for volume in &volumes {
            for node in volume.config_nodes() {
                *counts.entry(node).or_insert(0) += 1;
            }
        }

        let mut distinct = counts.values();
        if let Some(first) = distinct.next() {
            if distinct.any(|count| count != first) {
                warn!(group = %group.metadata.name, "Volumes of group disagree on nodes: {:?}", counts);
                return Err(GroupError::InconsistentAccessibility(group.metadata.name.clone()));
            }
        }

        let nodes: Vec<String> = counts.into_keys().collect();
        let mut current = group.spec.accessibility.nodes.clone();
        current.sort();
        if nodes.is_empty() || nodes == current {
            return Ok(());
        }

        info!(group = %group.metadata.name, "Updating group accessibility to {:?}", nodes);
        self.groups
            .patch(
                &group.metadata.name,
                &json!({"spec": {"accessibility": {"nodes": nodes}}}),
            )
            .await?;
        Ok(())
    }

    /// Drops the group from the index and its finalizer from the record,
    /// which lets a pending delete complete.
    async fn release_group(&self, mut group: LocalVolumeGroup) -> Result<()> {
        let mut index = self.index.lock().await;
        index.remove_group(&group.metadata.name);
        if group.metadata.remove_finalizer(VOLUME_GROUP_FINALIZER) {
            info!(group = %group.metadata.name, "Releasing group");
            self.groups.update(&group).await?;
        }
        Ok(())
    }

    async fn delete_group(&self, group: LocalVolumeGroup) -> Result<()> {
        if !group.spec.volumes.is_empty() {
            return Err(GroupError::VolumesNotEmpty(group.metadata.name.clone()));
        }
        let name = group.metadata.name.clone();
        self.release_group(group).await?;
        info!(group = %name, "Deleting empty group");
        self.groups.delete_opt(&name).await?;
        Ok(())
    }

    pub async fn process_volume(&self, name: &str) -> Result<()> {
        match self.volumes.get_opt(name).await? {
            Some(volume) if volume.status.state != VolumeState::Deleted => {
                self.add_volume(&volume).await
            }
            _ => self.delete_volume(name).await,
        }
    }

    async fn add_volume(&self, volume: &LocalVolume) -> Result<()> {
        if volume.spec.volume_group.is_empty() {
            return Ok(());
        }

        let mut index = self.index.lock().await;
        let Some(mut group) = self.groups.get_opt(&volume.spec.volume_group).await? else {
            debug!(volume = %volume.metadata.name, "Group {} not found", volume.spec.volume_group);
            return Ok(());
        };

        let name = &volume.metadata.name;
        for i in 0..group.spec.volumes.len() {
            let member = &group.spec.volumes[i];
            if member.local_volume_name == *name {
                index.volumes.insert(name.clone(), group.metadata.name.clone());
                if group.spec.accessibility.nodes.is_empty()
                    && !volume.spec.accessibility.nodes.is_empty()
                {
                    group.spec.accessibility = volume.spec.accessibility.clone();
                    self.groups.update(&group).await?;
                }
                return Ok(());
            }
            if member.pvc_name == volume.spec.persistent_volume_claim_name
                && group.spec.namespace == volume.spec.persistent_volume_claim_namespace
            {
                debug!(volume = %name, group = %group.metadata.name, "Attaching volume to its claim entry");
                group.spec.volumes[i].local_volume_name = name.clone();
                self.groups.update(&group).await?;
                index.volumes.insert(name.clone(), group.metadata.name.clone());
                return Ok(());
            }
        }

        Err(GroupError::NoMatchingClaim {
            volume: name.clone(),
            group: group.metadata.name.clone(),
        })
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        let mut index = self.index.lock().await;
        let Some(group_name) = index.volumes.get(name).cloned() else {
            return Ok(());
        };
        let Some(mut group) = self.groups.get_opt(&group_name).await? else {
            index.volumes.remove(name);
            return Ok(());
        };

        let before = group.spec.volumes.len();
        let mut modified = false;
        let mut remaining = Vec::with_capacity(before);
        for member in group.spec.volumes.drain(..) {
            if member.local_volume_name != name {
                remaining.push(member);
                continue;
            }
            modified = true;
            if !member.pvc_name.is_empty() {
                remaining.push(VolumeInfo {
                    pvc_name: member.pvc_name,
                    local_volume_name: String::new(),
                });
            }
        }
        group.spec.volumes = remaining;
        if modified {
            info!(volume = %name, group = %group_name, "Removing volume from group");
            self.groups.update(&group).await?;
        }
        index.volumes.remove(name);
        Ok(())
    }

    pub async fn process_claim(&self, key: &ObjectKey) -> Result<()> {
        let claims: Api<PersistentVolumeClaim> = Api::namespaced(self.store.clone(), &key.namespace);
        match claims.get_opt(&key.name).await? {
            Some(claim) if !claim.metadata.is_deleting() => self.add_claim(&claim).await,
            _ => self.delete_claim(key).await,
        }
    }

    /// Indexes a driver claim under the group that lists it. A claim no group
    /// lists yet joins the group of a sibling claim mounted by the same pod;
    /// otherwise the group is created when its volume is provisioned.
    async fn add_claim(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        if !self.is_driver_claim(claim).await? {
            return Ok(());
        }
        let key = claim.metadata.key();

        if let Some(group) = self.group_by_claim(&key.namespace, &key.name).await? {
            self.index.lock().await.insert_group(&group);
            return Ok(());
        }

        let pods: Api<Pod> = Api::namespaced(self.store.clone(), &key.namespace);
        for pod in pods.list().await? {
            let claims = pod.claim_names();
            if !claims.contains(&key.name) {
                continue;
            }
            for sibling in claims.iter().filter(|c| **c != key.name) {
                let Some(mut group) = self.group_by_claim(&key.namespace, sibling).await? else {
                    continue;
                };
                let mut index = self.index.lock().await;
                info!(claim = %key, group = %group.metadata.name, "Adding claim to the group of its pod");
                group.spec.volumes.push(VolumeInfo {
                    pvc_name: key.name.clone(),
                    local_volume_name: String::new(),
                });
                if !group.spec.pods.contains(&pod.metadata.name) {
                    group.spec.pods.push(pod.metadata.name.clone());
                }
                let group = self.groups.update(&group).await?;
                index.insert_group(&group);
                return Ok(());
            }
        }
        Ok(())
    }

    async fn delete_claim(&self, key: &ObjectKey) -> Result<()> {
        let mut index = self.index.lock().await;
        let Some(group_name) = index.claims.get(key).cloned() else {
            return Ok(());
        };
        let Some(mut group) = self.groups.get_opt(&group_name).await? else {
            index.claims.remove(key);
            return Ok(());
        };

        let mut modified = false;
        if group.spec.namespace == key.namespace {
            let mut remaining = Vec::with_capacity(group.spec.volumes.len());
            for member in group.spec.volumes.drain(..) {
                if member.pvc_name != key.name {
                    remaining.push(member);
                    continue;
                }
                modified = true;
                if !member.local_volume_name.is_empty() {
                    remaining.push(VolumeInfo {
                        pvc_name: String::new(),
                        local_volume_name: member.local_volume_name,
                    });
                }
            }
            group.spec.volumes = remaining;
        }
        if modified {
            info!(claim = %key, group = %group_name, "Removing claim from group");
            self.groups.update(&group).await?;
        }
        index.claims.remove(key);
        Ok(())
    }

    pub async fn process_pod(&self, key: &ObjectKey) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.store.clone(), &key.namespace);
        match pods.get_opt(&key.name).await? {
            Some(pod) if !pod.metadata.is_deleting() => self.add_pod(&pod).await,
            _ => self.delete_pod(key).await,
        }
    }

    /// Lists the pod on the group of any claim it mounts.
    async fn add_pod(&self, pod: &Pod) -> Result<()> {
        let key = pod.metadata.key();
        let mut index = self.index.lock().await;
        let group_name = pod
            .claim_names()
            .into_iter()
            .find_map(|claim| index.claims.get(&ObjectKey::new(key.namespace.as_str(), claim)).cloned());
        let Some(group_name) = group_name else {
            return Ok(());
        };
        let Some(mut group) = self.groups.get_opt(&group_name).await? else {
            return Ok(());
        };

        if !group.spec.pods.contains(&key.name) {
            debug!(pod = %key, group = %group_name, "Adding pod to group");
            group.spec.pods.push(key.name.clone());
            self.groups.update(&group).await?;
        }
        index.pods.insert(key, group_name);
        Ok(())
    }

    async fn delete_pod(&self, key: &ObjectKey) -> Result<()> {
        let mut index = self.index.lock().await;
        let Some(group_name) = index.pods.get(key).cloned() else {
            return Ok(());
        };
        let Some(mut group) = self.groups.get_opt(&group_name).await? else {
            index.pods.remove(key);
            return Ok(());
        };
        if group.spec.namespace != key.namespace {
            index.pods.remove(key);
            return Ok(());
        }

        let before = group.spec.pods.len();
        group.spec.pods.retain(|p| *p != key.name);
        if group.spec.pods.len() < before {
            debug!(pod = %key, group = %group_name, "Removing pod from group");
            self.groups.update(&group).await?;
        }
        index.pods.remove(key);
        Ok(())
    }
}
