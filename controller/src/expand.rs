use apis::{
    round_to_extent, LocalVolumeExpand, OperationState, PoolType, LVM_EXTENT_SIZE,
    VOLUME_EXPANSION_CAPACITY_BYTES_MIN,
};
use tracing::{debug, info};

use crate::manager::ControllerManager;
use crate::recovery::recreate;
use crate::{ControllerError, Result};

/// Pool space an expansion by `delta` takes on one node. Thin pools also
/// grow their metadata, which is mirrored.
pub fn expand_capacity_needed(delta: i64, thin: bool) -> i64 {
    if !thin {
        return delta;
    }
    let metadata = (delta / 1000).max(LVM_EXTENT_SIZE);
    delta + 2 * metadata
}

impl ControllerManager {
    pub(crate) async fn process_expand(&self, name: &str) -> Result<()> {
        let Some(op) = self.expands.get_opt(name).await? else {
            if let Some(lost) = self.lost_expands.take(name) {
                recreate(&self.expands, lost).await?;
            }
            return Ok(());
        };
        debug!(expand = %name, state = %op.status.state, "Processing volume expand");

        if op.spec.abort && !op.status.state.is_terminal() && op.status.state != OperationState::ToBeAborted {
            return self.set_expand_state(op, OperationState::ToBeAborted, "").await;
        }

        match op.status.state {
            OperationState::Empty => self.submit_expand(op).await,
            OperationState::Submitted => self.start_expand(op).await,
            OperationState::InProgress => self.check_expand(op).await,
            OperationState::ToBeAborted => self.set_expand_state(op, OperationState::Aborted, "").await,
            OperationState::Completed | OperationState::Aborted | OperationState::Failed => Ok(()),
        }
    }

    async fn set_expand_state(&self, mut op: LocalVolumeExpand, state: OperationState, message: &str) -> Result<()> {
        info!(expand = %op.metadata.name, from = %op.status.state, to = %state, "Volume expand state changed");
        op.status.state = state;
        op.status.message = message.to_string();
        self.expands.update_status(&op).await?;
        Ok(())
    }

    async fn submit_expand(&self, op: LocalVolumeExpand) -> Result<()> {
        if op.spec.required_capacity_bytes <= 0 {
            let message = format!("invalid capacity {}", op.spec.required_capacity_bytes);
            return self.set_expand_state(op, OperationState::Failed, &message).await;
        }
        if self.volumes.get_opt(&op.spec.volume_name).await?.is_none() {
            let message = ControllerError::VolumeNotFound(op.spec.volume_name.clone()).to_string();
            return self.set_expand_state(op, OperationState::Failed, &message).await;
        }
        self.set_expand_state(op, OperationState::Submitted, "").await
    }

    /// Checks that every replica node can hold the extra capacity, then
    /// raises the volume's required capacity.
    async fn start_expand(&self, mut op: LocalVolumeExpand) -> Result<()> {
        let Some(mut vol) = self.volumes.get_opt(&op.spec.volume_name).await? else {
            let message = ControllerError::VolumeNotFound(op.spec.volume_name.clone()).to_string();
            return self.set_expand_state(op, OperationState::Failed, &message).await;
        };

        let target = round_to_extent(op.spec.required_capacity_bytes);
        let current = vol.spec.required_capacity_bytes;
        if target <= current {
            if vol.status.allocated_capacity_bytes >= target - VOLUME_EXPANSION_CAPACITY_BYTES_MIN {
                op.status.allocated_capacity_bytes = vol.status.allocated_capacity_bytes;
                return self.set_expand_state(op, OperationState::Completed, "").await;
            }
            return self.set_expand_state(op, OperationState::InProgress, "").await;
        }

        let delta = target - current;
        for node in vol.config_nodes() {
            let thin = self
                .nodes
                .get_opt(&node)
                .await?
                .and_then(|n| n.status.pools.get(&vol.spec.pool_name).map(|p| p.pool_type == PoolType::Thin))
                .unwrap_or(false);
            let required = expand_capacity_needed(delta, thin);
            let free = self
                .scheduler
                .free_capacity(vol.spec.volume_kind, &vol.spec.pool_name, &node);
            if free < required {
                return Err(ControllerError::NotEnoughCapacity { node, required, free });
            }
        }

        info!(volume = %vol.metadata.name, from = current, to = target, "Expanding volume");
        vol.spec.required_capacity_bytes = target;
        self.volumes.update(&vol).await?;
        self.set_expand_state(op, OperationState::InProgress, "").await
    }

    /// Completes once the volume and each of its replicas hold the target.
    async fn check_expand(&self, mut op: LocalVolumeExpand) -> Result<()> {
        let Some(vol) = self.volumes.get_opt(&op.spec.volume_name).await? else {
            let message = ControllerError::VolumeNotFound(op.spec.volume_name.clone()).to_string();
            return self.set_expand_state(op, OperationState::Failed, &message).await;
        };
        let target = round_to_extent(op.spec.required_capacity_bytes) - VOLUME_EXPANSION_CAPACITY_BYTES_MIN;

        let replicas = self.volume_replicas(&vol.metadata.name).await?;
        let done = !replicas.is_empty()
            && replicas.iter().all(|r| r.status.allocated_capacity_bytes >= target)
            && vol.status.allocated_capacity_bytes >= target;
        if !done {
            debug!(expand = %op.metadata.name, "Waiting for replicas to expand");
            self.expand_queue.add_rate_limited(op.metadata.name.clone());
            return Ok(());
        }

        op.status.allocated_capacity_bytes = vol.status.allocated_capacity_bytes;
        self.set_expand_state(op, OperationState::Completed, "").await
    }
}
