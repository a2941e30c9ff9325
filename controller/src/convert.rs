use apis::{LocalVolume, LocalVolumeConvert, OperationState, VolumeState};
use tracing::{debug, info, warn};

use crate::manager::ControllerManager;
use crate::recovery::recreate;
use crate::{ControllerError, Result};

/// Conversion only goes from one replica to two.
const CONVERTED_REPLICA_NUMBER: i64 = 2;

impl ControllerManager {
    pub(crate) async fn process_convert(&self, name: &str) -> Result<()> {
        let Some(op) = self.converts.get_opt(name).await? else {
            if let Some(lost) = self.lost_converts.take(name) {
                recreate(&self.converts, lost).await?;
            }
            return Ok(());
        };
        debug!(convert = %name, state = %op.status.state, "Processing volume convert");

        if op.spec.abort && !op.status.state.is_terminal() && op.status.state != OperationState::ToBeAborted {
            return self.set_convert_state(op, OperationState::ToBeAborted, "").await;
        }

        match op.status.state {
            OperationState::Empty => self.submit_convert(op).await,
            OperationState::Submitted => self.start_convert(op).await,
            OperationState::InProgress => self.check_convert(op).await,
            OperationState::ToBeAborted => self.set_convert_state(op, OperationState::Aborted, "").await,
            OperationState::Completed | OperationState::Aborted | OperationState::Failed => Ok(()),
        }
    }

    async fn set_convert_state(&self, mut op: LocalVolumeConvert, state: OperationState, message: &str) -> Result<()> {
        info!(convert = %op.metadata.name, from = %op.status.state, to = %state, "Volume convert state changed");
        op.status.state = state;
        op.status.message = message.to_string();
        self.converts.update_status(&op).await?;
        Ok(())
    }

    /// The volume and, when it belongs to a group, every other member.
    async fn convert_targets(&self, volume: &str) -> Result<Vec<LocalVolume>> {
        let vol = self
            .volumes
            .get_opt(volume)
            .await?
            .ok_or_else(|| ControllerError::VolumeNotFound(volume.to_string()))?;
        if vol.spec.volume_group.is_empty() {
            return Ok(vec![vol]);
        }
        let Some(group) = self.volume_groups.get_opt(&vol.spec.volume_group).await? else {
            return Ok(vec![vol]);
        };

        let mut targets = vec![vol];
        for member in group.volume_names() {
            if member == volume {
                continue;
            }
            let member = self
                .volumes
                .get_opt(&member)
                .await?
                .ok_or(ControllerError::VolumeNotFound(member))?;
            targets.push(member);
        }
        Ok(targets)
    }

    async fn submit_convert(&self, op: LocalVolumeConvert) -> Result<()> {
        if op.spec.replica_number != CONVERTED_REPLICA_NUMBER {
            let message = format!(
                "unsupported replica number {}, only {} is supported",
                op.spec.replica_number, CONVERTED_REPLICA_NUMBER
            );
            return self.set_convert_state(op, OperationState::Failed, &message).await;
        }
        let targets = match self.convert_targets(&op.spec.volume_name).await {
            Ok(targets) => targets,
            Err(ControllerError::VolumeNotFound(v)) => {
                let message = ControllerError::VolumeNotFound(v).to_string();
                return self.set_convert_state(op, OperationState::Failed, &message).await;
            }
            Err(e) => return Err(e),
        };
        for vol in &targets {
            if let Some(message) = convert_rejection(vol) {
                warn!(convert = %op.metadata.name, "Rejecting convert: {}", message);
                return self.set_convert_state(op, OperationState::Failed, &message).await;
            }
        }
        self.set_convert_state(op, OperationState::Submitted, "").await
    }

    async fn start_convert(&self, op: LocalVolumeConvert) -> Result<()> {
        for mut vol in self.convert_targets(&op.spec.volume_name).await? {
            if vol.spec.replica_number >= op.spec.replica_number {
                continue;
            }
            info!(volume = %vol.metadata.name, replicas = op.spec.replica_number, "Converting volume to HA");
            vol.spec.replica_number = op.spec.replica_number;
            self.volumes.update(&vol).await?;
        }
        self.set_convert_state(op, OperationState::InProgress, "").await
    }

    async fn check_convert(&self, op: LocalVolumeConvert) -> Result<()> {
        for vol in self.convert_targets(&op.spec.volume_name).await? {
            let replicas = self.volume_replicas(&vol.metadata.name).await?;
            let ready = replicas.iter().filter(|r| r.is_ready_and_synced()).count() as i64;
            if ready < op.spec.replica_number || vol.status.state != VolumeState::Ready {
                debug!(convert = %op.metadata.name, volume = %vol.metadata.name, ready, "Waiting for replicas");
                self.convert_queue.add_rate_limited(op.metadata.name.clone());
                return Ok(());
            }
        }
        self.set_convert_state(op, OperationState::Completed, "").await
    }
}

fn convert_rejection(vol: &LocalVolume) -> Option<String> {
    if !vol.spec.convertible {
        return Some(format!("volume {} is not convertible", vol.metadata.name));
    }
    if vol.spec.replica_number != 1 {
        return Some(format!(
            "volume {} has {} replicas, expected 1",
            vol.metadata.name, vol.spec.replica_number
        ));
    }
    if vol.status.state != VolumeState::Ready {
        return Some(format!("volume {} is not ready", vol.metadata.name));
    }
    None
}
