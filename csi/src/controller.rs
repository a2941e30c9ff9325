use apis::{
    LocalVolume, LocalVolumeExpand, LocalVolumeExpandSpec, LocalVolumeSpec, ObjectMeta,
    OperationState, ReplicaState, VolumeState, VOLUME_EXPANSION_CAPACITY_BYTES_MIN,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::mounter::DEFAULT_FS_TYPE;
use crate::params::VolumeParameters;
use crate::plugin::{Controller, Plugin};
use crate::types::*;
use crate::{CsiError, CsiResult};

/// Only single-node writers are served; local volumes attach to one node.
fn unsupported_access_mode(capabilities: &[VolumeCapability]) -> Option<AccessMode> {
    capabilities
        .iter()
        .map(|c| c.access_mode)
        .find(|m| *m != AccessMode::SingleNodeWriter)
}

fn require_id(id: &str, what: &str) -> CsiResult<()> {
    if id.is_empty() {
        return Err(CsiError::InvalidArgument(format!("{} is empty", what)));
    }
    Ok(())
}

fn volume_status(vol: &LocalVolume) -> VolumeStatus {
    let ready = vol.status.state == VolumeState::Ready;
    VolumeStatus {
        published_node_ids: if vol.is_published() {
            vec![vol.status.published_node_name.clone()]
        } else {
            Vec::new()
        },
        volume_condition: VolumeCondition {
            abnormal: !ready,
            message: if ready {
                "The volume is ready".to_string()
            } else {
                "The volume is not ready".to_string()
            },
        },
    }
}

fn volume_message(vol: &LocalVolume, context: BTreeMap<String, String>) -> Volume {
    Volume {
        volume_id: vol.metadata.name.clone(),
        capacity_bytes: vol.status.allocated_capacity_bytes,
        volume_context: context,
        accessible_topology: vol.config_nodes().iter().map(|n| Topology::node(n)).collect(),
    }
}

impl Plugin {
    async fn build_volume(&self, req: &CreateVolumeRequest, params: &VolumeParameters) -> CsiResult<LocalVolume> {
        let mut spec = LocalVolumeSpec {
            pool_name: params.pool_name().to_string(),
            required_capacity_bytes: req.required_bytes(),
            replica_number: params.replica_number,
            convertible: params.convertible,
            volume_kind: params.volume_kind,
            volume_qos: params.qos.clone(),
            ..Default::default()
        };

        if let Some((namespace, claim)) = &params.claim {
            let group = self
                .resolve_group(namespace, claim, params, req.required_bytes(), req.requisite_node())
                .await?;
            spec.volume_group = group.metadata.name.clone();
            spec.accessibility = group.spec.accessibility.clone();
            spec.persistent_volume_claim_namespace = namespace.clone();
            spec.persistent_volume_claim_name = claim.clone();
        } else if let Some(node) = req.requisite_node() {
            spec.accessibility.nodes = vec![node.to_string()];
        }

        Ok(LocalVolume {
            metadata: ObjectMeta::named(req.name.clone()),
            spec,
            ..Default::default()
        })
    }

    async fn wait_volume_ready(&self, name: &str) -> CsiResult<LocalVolume> {
        for attempt in 0..=self.config.create_retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.create_retry_delay()).await;
            }
            match self.volumes.get_opt(name).await? {
                Some(vol) if vol.status.state == VolumeState::Ready => return Ok(vol),
                Some(vol) => debug!(volume = %name, state = %vol.status.state, attempt, "Volume not ready yet"),
                None => debug!(volume = %name, attempt, "Volume record not visible yet"),
            }
        }
        Err(CsiError::Unavailable(format!("volume {} still in creating", name)))
    }

    /// Pending restores into a volume that is going away are aborted.
    async fn abort_restores_into(&self, volume: &str) -> CsiResult<()> {
        for mut restore in self.restores.list().await? {
            if restore.spec.target_volume != volume || restore.spec.abort || restore.status.state.is_terminal() {
                continue;
            }
            info!(restore = %restore.metadata.name, volume = %volume, "Aborting snapshot restore of deleted volume");
            restore.spec.abort = true;
            self.restores.update(&restore).await?;
        }
        Ok(())
    }

    async fn get_volume(&self, id: &str) -> CsiResult<LocalVolume> {
        self.volumes
            .get_opt(id)
            .await?
            .ok_or_else(|| CsiError::NotFound(format!("volume {} not found", id)))
    }
}

#[async_trait]
impl Controller for Plugin {
    async fn create_volume(&self, req: CreateVolumeRequest) -> CsiResult<CreateVolumeResponse> {
        if let Some(source) = &req.volume_content_source {
            let kind = if source.snapshot_id.is_some() { "snapshot" } else { "volume clone" };
            return Err(CsiError::Unimplemented(format!("creating from a {} is not supported", kind)));
        }
        require_id(&req.name, "volume name")?;
        if req.required_bytes() <= 0 {
            return Err(CsiError::InvalidArgument(format!(
                "invalid required capacity {}",
                req.required_bytes()
            )));
        }
        if let Some(mode) = unsupported_access_mode(&req.volume_capabilities) {
            return Err(CsiError::InvalidArgument(format!("unsupported access mode {:?}", mode)));
        }
        let params = VolumeParameters::parse(&req.parameters)?;

        {
            let _guard = self.create_lock.lock().await;
            if self.volumes.get_opt(&req.name).await?.is_none() {
                let vol = self.build_volume(&req, &params).await?;
                match self.volumes.create(&vol).await {
                    Ok(_) => info!(
                        volume = %req.name,
                        pool = %vol.spec.pool_name,
                        replicas = vol.spec.replica_number,
                        capacity = vol.spec.required_capacity_bytes,
                        group = %vol.spec.volume_group,
                        "Volume record created"
                    ),
                    Err(e) if e.is_already_exists() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let vol = self.wait_volume_ready(&req.name).await?;
        Ok(CreateVolumeResponse {
            volume: volume_message(&vol, req.parameters.clone()),
        })
    }

    async fn delete_volume(&self, req: DeleteVolumeRequest) -> CsiResult<Empty> {
        require_id(&req.volume_id, "volume id")?;
        self.abort_restores_into(&req.volume_id).await?;

        let Some(mut vol) = self.volumes.get_opt(&req.volume_id).await? else {
            return Ok(Empty {});
        };
        let state = vol.status.state;
        match state {
            VolumeState::Deleted => return Ok(Empty {}),
            VolumeState::ToBeDeleted => {}
            _ if !vol.spec.delete => {
                info!(volume = %req.volume_id, "Marking volume for deletion");
                vol.spec.delete = true;
                self.volumes.update(&vol).await?;
            }
            _ => {}
        }
        Err(CsiError::Unavailable(format!("volume {} in deleting", req.volume_id)))
    }

    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> CsiResult<ControllerPublishVolumeResponse> {
        require_id(&req.volume_id, "volume id")?;
        require_id(&req.node_id, "node id")?;
        let mut vol = self.get_volume(&req.volume_id).await?;
        if vol.is_published() && vol.status.published_node_name != req.node_id {
            return Err(CsiError::FailedPrecondition(format!(
                "volume {} is published to node {}",
                req.volume_id, vol.status.published_node_name
            )));
        }

        for name in &vol.status.replicas {
            let Some(replica) = self.replicas.get_opt(name).await? else {
                continue;
            };
            if replica.spec.node_name != req.node_id {
                continue;
            }
            if replica.status.state != ReplicaState::Ready || !replica.status.synced {
                return Err(CsiError::FailedPrecondition(format!(
                    "replica {} is {} (synced: {})",
                    name, replica.status.state, replica.status.synced
                )));
            }
            if replica.status.device_path.is_empty() {
                return Err(CsiError::FailedPrecondition(format!("replica {} has no device path", name)));
            }

            let (fs_type, raw_block) = match req.volume_capability.as_ref().map(|c| &c.access_type) {
                Some(AccessType::Block) => (String::new(), true),
                Some(AccessType::Mount(m)) if !m.fs_type.is_empty() => (m.fs_type.clone(), false),
                _ => (DEFAULT_FS_TYPE.to_string(), false),
            };
            if vol.status.published_node_name != req.node_id
                || vol.status.published_fs_type != fs_type
                || vol.status.published_raw_block != raw_block
            {
                vol.status.published_node_name = req.node_id.clone();
                vol.status.published_fs_type = fs_type;
                vol.status.published_raw_block = raw_block;
                self.volumes.update_status(&vol).await?;
                info!(volume = %req.volume_id, node = %req.node_id, replica = %name, "Volume published");
            }

            let mut publish_context = BTreeMap::new();
            publish_context.insert(DEVICE_PATH_KEY.to_string(), replica.status.device_path.clone());
            publish_context.insert(REPLICA_NAME_KEY.to_string(), name.clone());
            return Ok(ControllerPublishVolumeResponse { publish_context });
        }

        Err(CsiError::NotFound(format!(
            "volume {} has no replica on node {}",
            req.volume_id, req.node_id
        )))
    }

    async fn controller_unpublish_volume(&self, req: ControllerUnpublishVolumeRequest) -> CsiResult<Empty> {
        require_id(&req.volume_id, "volume id")?;
        let Some(mut vol) = self.volumes.get_opt(&req.volume_id).await? else {
            return Ok(Empty {});
        };
        if !vol.is_published() {
            return Ok(Empty {});
        }
        if !req.node_id.is_empty() && vol.status.published_node_name != req.node_id {
            return Err(CsiError::FailedPrecondition(format!(
                "volume {} is published to node {}, not {}",
                req.volume_id, vol.status.published_node_name, req.node_id
            )));
        }
        vol.status.published_node_name.clear();
        vol.status.published_fs_type.clear();
        vol.status.published_raw_block = false;
        self.volumes.update_status(&vol).await?;
        info!(volume = %req.volume_id, node = %req.node_id, "Volume unpublished");
        Ok(Empty {})
    }

    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> CsiResult<ValidateVolumeCapabilitiesResponse> {
        require_id(&req.volume_id, "volume id")?;
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument("volume capabilities are empty".to_string()));
        }
        self.get_volume(&req.volume_id).await?;

        Ok(match unsupported_access_mode(&req.volume_capabilities) {
            None => ValidateVolumeCapabilitiesResponse {
                confirmed: Some(req.volume_capabilities),
                message: String::new(),
            },
            Some(mode) => ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: format!("access mode {:?} is not supported", mode),
            },
        })
    }

    async fn list_volumes(&self, req: ListVolumesRequest) -> CsiResult<ListVolumesResponse> {
        if !req.starting_token.is_empty() {
            return Err(CsiError::Aborted(format!(
                "starting token {} is not supported",
                req.starting_token
            )));
        }
        let entries = self
            .volumes
            .list()
            .await?
            .iter()
            .map(|vol| ListVolumesEntry {
                volume: volume_message(vol, BTreeMap::new()),
                status: volume_status(vol),
            })
            .collect();
        Ok(ListVolumesResponse {
            entries,
            next_token: String::new(),
        })
    }

    async fn controller_get_volume(&self, req: ControllerGetVolumeRequest) -> CsiResult<ControllerGetVolumeResponse> {
        require_id(&req.volume_id, "volume id")?;
        let vol = self.get_volume(&req.volume_id).await?;
        Ok(ControllerGetVolumeResponse {
            volume: Some(volume_message(&vol, BTreeMap::new())),
            status: Some(volume_status(&vol)),
        })
    }

    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> CsiResult<ControllerExpandVolumeResponse> {
        require_id(&req.volume_id, "volume id")?;
        let range = req
            .capacity_range
            .ok_or_else(|| CsiError::InvalidArgument("capacity range is missing".to_string()))?;
        let vol = self.get_volume(&req.volume_id).await?;

        let required = range.required_bytes;
        let allocated = vol.status.allocated_capacity_bytes;
        let node_expansion_required = !req.volume_capability.as_ref().map_or(false, VolumeCapability::is_block);

        if required + VOLUME_EXPANSION_CAPACITY_BYTES_MIN < allocated {
            return Err(CsiError::OutOfRange(format!(
                "volume {} cannot shrink from {} to {}",
                req.volume_id, allocated, required
            )));
        }
        if (required - allocated).abs() <= VOLUME_EXPANSION_CAPACITY_BYTES_MIN {
            return Ok(ControllerExpandVolumeResponse {
                capacity_bytes: allocated,
                node_expansion_required,
            });
        }

        match self.expands.get_opt(&req.volume_id).await? {
            None => {
                let op = LocalVolumeExpand {
                    metadata: ObjectMeta::named(req.volume_id.clone()),
                    spec: LocalVolumeExpandSpec {
                        volume_name: req.volume_id.clone(),
                        required_capacity_bytes: required,
                        abort: false,
                    },
                    ..Default::default()
                };
                match self.expands.create(&op).await {
                    Ok(_) => info!(volume = %req.volume_id, from = allocated, to = required, "Volume expand submitted"),
                    Err(e) if e.is_already_exists() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Some(mut op) => {
                let same_target = op.spec.required_capacity_bytes == required;
                if !same_target || op.status.state.is_terminal() {
                    let failure = (same_target && op.status.state == OperationState::Failed)
                        .then(|| op.status.message.clone());

                    op.spec.required_capacity_bytes = required;
                    op.spec.abort = false;
                    let mut op = self.expands.update(&op).await?;
                    op.status = Default::default();
                    self.expands.update_status(&op).await?;
                    info!(volume = %req.volume_id, to = required, "Volume expand resubmitted");

                    if let Some(message) = failure {
                        warn!(volume = %req.volume_id, error = %message, "Previous expand failed");
                        return Err(CsiError::Internal(format!(
                            "expanding volume {} failed: {}",
                            req.volume_id, message
                        )));
                    }
                }
            }
        }

        Err(CsiError::Unavailable(format!("volume {} expansion in progress", req.volume_id)))
    }

    async fn get_capacity(&self) -> CsiResult<Empty> {
        Err(CsiError::Unimplemented(
            "capacity is tracked by the scheduler".to_string(),
        ))
    }

    async fn controller_get_capabilities(&self) -> CsiResult<ControllerGetCapabilitiesResponse> {
        Ok(ControllerGetCapabilitiesResponse {
            capabilities: vec![
                ControllerCapability::CreateDeleteVolume,
                ControllerCapability::PublishUnpublishVolume,
                ControllerCapability::ExpandVolume,
                ControllerCapability::ListVolumes,
                ControllerCapability::ListVolumesPublishedNodes,
                ControllerCapability::GetVolume,
                ControllerCapability::VolumeCondition,
            ],
        })
    }
}
