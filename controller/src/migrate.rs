use apis::{
    LocalVolume, LocalVolumeMigrate, LocalVolumeMigrateSpec, ObjectMeta, OperationState,
    VolumeState,
};
use tracing::{debug, info, warn};

use crate::manager::ControllerManager;
use crate::recovery::recreate;
use crate::{ControllerError, Result};

impl ControllerManager {
    /// Moves one replica of a volume off `spec.source_node`: a replica is
    /// added elsewhere, and once it is in sync the source one is pruned.
    pub(crate) async fn process_migrate(&self, name: &str) -> Result<()> {
        let Some(op) = self.migrates.get_opt(name).await? else {
            if let Some(lost) = self.lost_migrates.take(name) {
                recreate(&self.migrates, lost).await?;
            }
            return Ok(());
        };
        debug!(migrate = %name, state = %op.status.state, "Processing volume migrate");

        if op.spec.abort && !op.status.state.is_terminal() {
            return self.set_migrate_state(op, OperationState::Aborted, "").await;
        }

        match op.status.state {
            OperationState::Empty => self.submit_migrate(op).await,
            OperationState::Submitted => self.start_migrate(op).await,
            OperationState::InProgress => self.progress_migrate(op).await,
            OperationState::ToBeAborted => self.set_migrate_state(op, OperationState::Aborted, "").await,
            OperationState::Completed | OperationState::Aborted | OperationState::Failed => Ok(()),
        }
    }

    async fn set_migrate_state(&self, mut op: LocalVolumeMigrate, state: OperationState, message: &str) -> Result<()> {
        info!(migrate = %op.metadata.name, from = %op.status.state, to = %state, "Volume migrate state changed");
        op.status.state = state;
        op.status.message = message.to_string();
        self.migrates.update_status(&op).await?;
        Ok(())
    }

    async fn submit_migrate(&self, op: LocalVolumeMigrate) -> Result<()> {
        let Some(vol) = self.volumes.get_opt(&op.spec.volume_name).await? else {
            let message = ControllerError::VolumeNotFound(op.spec.volume_name.clone()).to_string();
            return self.set_migrate_state(op, OperationState::Failed, &message).await;
        };
        if let Some(message) = migrate_rejection(&vol, &op.spec.source_node) {
            warn!(migrate = %op.metadata.name, "Rejecting migrate: {}", message);
            return self.set_migrate_state(op, OperationState::Failed, &message).await;
        }

        if op.spec.migrate_all_vols && !vol.spec.volume_group.is_empty() {
            self.fan_out_migrate(&op, &vol).await?;
        }
        self.set_migrate_state(op, OperationState::Submitted, "").await
    }

    /// One child migrate per other member of the volume's group.
    async fn fan_out_migrate(&self, op: &LocalVolumeMigrate, vol: &LocalVolume) -> Result<()> {
        let Some(group) = self.volume_groups.get_opt(&vol.spec.volume_group).await? else {
            return Ok(());
        };
        for member in group.volume_names() {
            if member == vol.metadata.name {
                continue;
            }
            let child = LocalVolumeMigrate {
                metadata: ObjectMeta::named(child_migrate_name(&op.metadata.name, &member)),
                spec: LocalVolumeMigrateSpec {
                    volume_name: member.clone(),
                    source_node: op.spec.source_node.clone(),
                    target_nodes_suggested: op.spec.target_nodes_suggested.clone(),
                    migrate_all_vols: false,
                    abort: false,
                },
                status: Default::default(),
            };
            match self.migrates.create(&child).await {
                Ok(_) => info!(migrate = %op.metadata.name, volume = %member, "Created group member migrate"),
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Adds one replica slot and places it on a target node. The target and
    /// the starting replica count are recorded on the migrate before the
    /// volume grows, so a retry after any failed write grows it at most once.
    async fn start_migrate(&self, mut op: LocalVolumeMigrate) -> Result<()> {
        let Some(mut vol) = self.volumes.get_opt(&op.spec.volume_name).await? else {
            let message = ControllerError::VolumeNotFound(op.spec.volume_name.clone()).to_string();
            return self.set_migrate_state(op, OperationState::Failed, &message).await;
        };

        if op.status.target_node.is_empty() {
            let target = self.pick_migrate_target(&op, &vol)?;
            info!(migrate = %op.metadata.name, target = %target, "Migration target chosen");
            op.status.original_replica_number = vol.spec.replica_number;
            op.status.target_node = target;
            op = self.migrates.update_status(&op).await?;
        }

        let target = op.status.target_node.clone();
        let placed = vol.spec.config.as_ref().map_or(false, |c| c.replica_on(&target).is_some());
        if !placed {
            let node = self
                .nodes
                .get_opt(&target)
                .await?
                .ok_or_else(|| ControllerError::NoMigrationTarget(vol.metadata.name.clone()))?;
            let mut grown = vol.clone();
            grown.spec.accessibility.nodes.clear();
            grown.spec.replica_number = op.status.original_replica_number + 1;
            let config = self
                .scheduler
                .configure_volume_on_additional_nodes(&grown, std::slice::from_ref(&node))?;
            info!(
                volume = %vol.metadata.name,
                source = %op.spec.source_node,
                target = %target,
                "Adding migration replica"
            );
            vol.spec.replica_number = grown.spec.replica_number;
            vol.spec.config = Some(config);
            self.volumes.update(&vol).await?;
        }

        op.status.state = OperationState::InProgress;
        self.migrates.update_status(&op).await?;
        Ok(())
    }

    fn pick_migrate_target(&self, op: &LocalVolumeMigrate, vol: &LocalVolume) -> Result<String> {
        let mut grown = vol.clone();
        grown.spec.accessibility.nodes.clear();
        grown.spec.replica_number += 1;
        self.scheduler
            .get_node_candidates(&grown)?
            .into_iter()
            .map(|n| n.metadata.name)
            .find(|name| {
                name != &op.spec.source_node
                    && (op.spec.target_nodes_suggested.is_empty() || op.spec.target_nodes_suggested.contains(name))
            })
            .ok_or_else(|| ControllerError::NoMigrationTarget(vol.metadata.name.clone()))
    }

    async fn progress_migrate(&self, op: LocalVolumeMigrate) -> Result<()> {
        let Some(mut vol) = self.volumes.get_opt(&op.spec.volume_name).await? else {
            let message = ControllerError::VolumeNotFound(op.spec.volume_name.clone()).to_string();
            return self.set_migrate_state(op, OperationState::Failed, &message).await;
        };
        let source = &op.spec.source_node;
        let replicas = self.volume_replicas(&vol.metadata.name).await?;
        let config = vol.spec.config.clone().unwrap_or_default();

        if config.replica_on(source).is_some() {
            let others_ready = config
                .replicas
                .iter()
                .filter(|e| &e.hostname != source)
                .all(|e| {
                    replicas
                        .iter()
                        .any(|r| r.spec.node_name == e.hostname && r.is_ready_and_synced())
                });
            if !others_ready {
                debug!(migrate = %op.metadata.name, "Waiting for the new replica to sync");
                self.migrate_queue.add_rate_limited(op.metadata.name.clone());
                return Ok(());
            }

            info!(volume = %vol.metadata.name, source = %source, "Pruning source replica");
            let mut config = config;
            let source_was_primary = config.replica_on(source).map_or(false, |e| e.primary);
            config.replicas.retain(|e| &e.hostname != source);
            if source_was_primary {
                if let Some(first) = config.replicas.first_mut() {
                    first.primary = true;
                }
            }
            config.version += 1;
            if !vol.spec.accessibility.nodes.is_empty() {
                vol.spec.accessibility.nodes = config.nodes();
            }
            vol.spec.replica_number = op.status.original_replica_number.max(1);
            vol.spec.config = Some(config);
            self.volumes.update(&vol).await?;
            self.migrate_queue.add_rate_limited(op.metadata.name.clone());
            return Ok(());
        }

        let on_source = self
            .replicas
            .list()
            .await?
            .into_iter()
            .any(|r| r.spec.volume_name == vol.metadata.name && &r.spec.node_name == source);
        if on_source {
            debug!(migrate = %op.metadata.name, "Waiting for the source replica to be removed");
            self.migrate_queue.add_rate_limited(op.metadata.name.clone());
            return Ok(());
        }

        if op.spec.migrate_all_vols {
            if let Some(pending) = self.pending_children(&op, &vol).await? {
                return match pending {
                    ChildProgress::Failed(message) => {
                        self.set_migrate_state(op, OperationState::Failed, &message).await
                    }
                    ChildProgress::Running => {
                        self.migrate_queue.add_rate_limited(op.metadata.name.clone());
                        Ok(())
                    }
                };
            }
            self.update_group_accessibility(&vol).await?;
        }

        if vol.status.state != VolumeState::Ready {
            self.migrate_queue.add_rate_limited(op.metadata.name.clone());
            return Ok(());
        }
        self.set_migrate_state(op, OperationState::Completed, "").await
    }

    async fn pending_children(&self, op: &LocalVolumeMigrate, vol: &LocalVolume) -> Result<Option<ChildProgress>> {
        let Some(group) = self.volume_groups.get_opt(&vol.spec.volume_group).await? else {
            return Ok(None);
        };
        for member in group.volume_names() {
            if member == vol.metadata.name {
                continue;
            }
            let child = self.migrates.get_opt(&child_migrate_name(&op.metadata.name, &member)).await?;
            match child.map(|c| (c.status.state, c.status.message)) {
                Some((OperationState::Completed, _)) => {}
                Some((OperationState::Failed, message)) | Some((OperationState::Aborted, message)) => {
                    return Ok(Some(ChildProgress::Failed(format!("migrate of {} failed: {}", member, message))));
                }
                _ => return Ok(Some(ChildProgress::Running)),
            }
        }
        Ok(None)
    }

    async fn update_group_accessibility(&self, vol: &LocalVolume) -> Result<()> {
        let Some(mut group) = self.volume_groups.get_opt(&vol.spec.volume_group).await? else {
            return Ok(());
        };
        let nodes = vol.config_nodes();
        if group.spec.accessibility.nodes == nodes {
            return Ok(());
        }
        info!(group = %group.metadata.name, nodes = ?nodes, "Updating group accessibility");
        group.spec.accessibility.nodes = nodes;
        self.volume_groups.update(&group).await?;
        Ok(())
    }
}

enum ChildProgress {
    Running,
    Failed(String),
}

fn child_migrate_name(parent: &str, volume: &str) -> String {
    format!("{}-{}", parent, volume)
}

/// Why a volume cannot be migrated off `source`, if it cannot.
fn migrate_rejection(vol: &LocalVolume, source: &str) -> Option<String> {
    if vol.status.state != VolumeState::Ready {
        return Some(format!("volume {} is not ready", vol.metadata.name));
    }
    if !vol.is_ha() {
        return Some(format!("volume {} is neither HA nor convertible", vol.metadata.name));
    }
    if !vol.config_nodes().iter().any(|n| n == source) {
        return Some(format!("volume {} has no replica on node {}", vol.metadata.name, source));
    }
    None
}
