use apis::{
    DeviceState, DiskClaimState, DiskClaimStatus, LocalDevice, LocalDisk, LocalDiskClaim,
    LocalDiskNode, LocalDiskNodeSpec, LocalDiskState, NodeConditionType, ObjectMeta,
    StorageNodeCondition,
};
use diskmonitor::{DiskAction, DiskEvent};
use tracing::{debug, error, info};

use crate::agent::NodeAgent;
use crate::Result;

impl NodeAgent {
    /// Folds the disks of a bound claim into the pools of this node.
    pub(crate) async fn process_disk_claim(&self, name: &str) -> Result<()> {
        let Some(claim) = self.disk_claims.get_opt(name).await? else {
            return Ok(());
        };
        if claim.spec.node_name != self.config.node_name || claim.status.status != DiskClaimStatus::Bound {
            return Ok(());
        }

        let mut disks = Vec::new();
        for disk_ref in &claim.spec.disk_refs {
            match self.disks.get_opt(disk_ref).await? {
                Some(disk) if disk.is_consumable() => disks.push(disk),
                Some(_) => debug!(claim = %name, disk = %disk_ref, "Disk not consumable, skip"),
                None => debug!(claim = %name, disk = %disk_ref, "Disk not found, skip"),
            }
        }

        if !disks.is_empty() {
            let devices: Vec<LocalDevice> = disks
                .iter()
                .map(|d| LocalDevice {
                    dev_path: d.spec.dev_path.clone(),
                    class: d.spec.disk_attributes.disk_type,
                    capacity_bytes: d.spec.capacity,
                    state: DeviceState::InUse,
                })
                .collect();

            info!(claim = %name, disks = devices.len(), "Extending storage pools");
            match self.executors.pools.extend_pools(&devices).await {
                Ok(_) => {
                    self.registry
                        .update_condition(StorageNodeCondition::new(
                            NodeConditionType::StorageExpandSuccess,
                            "StorageExpandSuccess",
                            format!("Disks of claim {} added to pools", name),
                        ))
                        .await?;
                }
                Err(e) => {
                    error!(claim = %name, "Failed to extend pools: {}", e);
                    self.registry
                        .update_condition(StorageNodeCondition::new(
                            NodeConditionType::StorageExpandFailure,
                            "StorageExpandFailure",
                            e.to_string(),
                        ))
                        .await?;
                    return Err(e);
                }
            }
        }

        self.registry.sync_node_resources().await?;
        let available = if self.registry.has_disks().await {
            StorageNodeCondition::new(NodeConditionType::StorageAvailable, "StorageAvailable", "Sufficient storage capacity")
        } else {
            StorageNodeCondition::new(NodeConditionType::StorageUnAvailable, "StorageUnAvailable", "No disks in any pool")
        };
        self.registry.update_condition(available).await?;

        let pool = claim.spec.description.disk_type.pool_name();
        self.registry.update_pool_extend_record(pool, &claim.spec).await?;

        for disk in disks {
            let mut updated = disk;
            updated.status.claim_state = DiskClaimState::InUse;
            self.disks.update_status(&updated).await?;
        }

        let mut consumed = claim;
        consumed.status.status = DiskClaimStatus::Consumed;
        self.disk_claims.update_status(&consumed).await?;
        info!(claim = %name, pool, "Disk claim consumed");
        Ok(())
    }

    /// Refreshes the disk inventory summary of this node.
    pub(crate) async fn process_disk(&self, name: &str) -> Result<()> {
        debug!(disk = %name, "Refreshing disk node summary");
        let disks: Vec<LocalDisk> = self
            .disks
            .list()
            .await?
            .into_iter()
            .filter(|d| d.spec.node_name == self.config.node_name)
            .collect();
        let total = disks.len() as i64;
        let allocatable = disks.iter().filter(|d| d.is_allocatable()).count() as i64;

        let node_name = &self.config.node_name;
        let mut disk_node = match self.disk_nodes.get_opt(node_name).await? {
            Some(n) => n,
            None => {
                let node = LocalDiskNode {
                    metadata: ObjectMeta::named(node_name),
                    spec: LocalDiskNodeSpec {
                        attach_node: node_name.clone(),
                    },
                    status: Default::default(),
                };
                self.disk_nodes.create(&node).await?
            }
        };
        if disk_node.status.total_disk == total && disk_node.status.allocatable_disk == allocatable {
            return Ok(());
        }
        disk_node.status.total_disk = total;
        disk_node.status.allocatable_disk = allocatable;
        self.disk_nodes.update_status(&disk_node).await?;
        Ok(())
    }

    pub(crate) async fn process_disk_event(&self, event: &DiskEvent) -> Result<()> {
        info!(
            dev = %event.dev_name,
            action = %event.action,
            seq = event.seq_num,
            "Handling disk event"
        );
        let disks: Vec<LocalDisk> = self
            .disks
            .list()
            .await?
            .into_iter()
            .filter(|d| d.spec.node_name == self.config.node_name && d.spec.dev_path == event.dev_name)
            .collect();

        match event.action {
            DiskAction::Add | DiskAction::Change => {
                for disk in &disks {
                    self.disk_queue.add(disk.metadata.name.clone());
                }
                let claims: Vec<LocalDiskClaim> = self.disk_claims.list().await?;
                for claim in claims {
                    if claim.spec.node_name == self.config.node_name && claim.status.status == DiskClaimStatus::Bound {
                        self.disk_claim_queue.add(claim.metadata.name);
                    }
                }
            }
            DiskAction::Remove => {
                for disk in disks {
                    if disk.spec.state == LocalDiskState::Inactive {
                        continue;
                    }
                    info!(disk = %disk.metadata.name, "Disk removed, marking inactive");
                    let mut updated = disk;
                    updated.spec.state = LocalDiskState::Inactive;
                    self.disks.update(&updated).await?;
                }
            }
        }
        Ok(())
    }
}
