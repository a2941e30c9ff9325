use async_trait::async_trait;
use tracing::{debug, info};

use crate::mounter::DEFAULT_FS_TYPE;
use crate::plugin::{Node, Plugin};
use crate::types::*;
use crate::{CsiError, CsiResult};

#[async_trait]
impl Node for Plugin {
    async fn node_get_info(&self) -> CsiResult<NodeGetInfoResponse> {
        Ok(NodeGetInfoResponse {
            node_id: self.config.node_name.clone(),
            accessible_topology: Topology::node(&self.config.node_name),
        })
    }

    async fn node_get_capabilities(&self) -> CsiResult<NodeGetCapabilitiesResponse> {
        Ok(NodeGetCapabilitiesResponse {
            capabilities: vec![NodeCapability::ExpandVolume],
        })
    }

    async fn node_publish_volume(&self, req: NodePublishVolumeRequest) -> CsiResult<Empty> {
        if req.volume_id.is_empty() || req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("volume id and target path are required".to_string()));
        }
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| CsiError::InvalidArgument("volume capability is missing".to_string()))?;
        let device = req
            .publish_context
            .get(DEVICE_PATH_KEY)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| CsiError::InvalidArgument(format!("publish context has no {}", DEVICE_PATH_KEY)))?;

        if self.mounter.is_mount_point(&req.target_path).await? {
            debug!(volume = %req.volume_id, target = %req.target_path, "Already mounted");
            return Ok(Empty {});
        }

        match &capability.access_type {
            AccessType::Block => {
                self.mounter.mount_raw_block(device, &req.target_path).await?;
            }
            AccessType::Mount(mount) => {
                let fs_type = if mount.fs_type.is_empty() {
                    DEFAULT_FS_TYPE
                } else {
                    mount.fs_type.as_str()
                };
                let mut options = mount.mount_flags.clone();
                if req.readonly {
                    options.push("ro".to_string());
                }
                // replicas of one volume share the xfs uuid
                if fs_type == "xfs" {
                    options.push("nouuid".to_string());
                }
                self.mounter
                    .format_and_mount(device, &req.target_path, fs_type, &options)
                    .await?;
            }
        }
        info!(volume = %req.volume_id, device = %device, target = %req.target_path, "Volume mounted");
        Ok(Empty {})
    }

    async fn node_unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> CsiResult<Empty> {
        if req.volume_id.is_empty() || req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("volume id and target path are required".to_string()));
        }
        self.mounter.unmount(&req.target_path).await?;
        info!(volume = %req.volume_id, target = %req.target_path, "Volume unmounted");
        Ok(Empty {})
    }

    async fn node_expand_volume(&self, req: NodeExpandVolumeRequest) -> CsiResult<NodeExpandVolumeResponse> {
        if req.volume_id.is_empty() || req.volume_path.is_empty() {
            return Err(CsiError::InvalidArgument("volume id and volume path are required".to_string()));
        }
        let capacity_bytes = req.capacity_range.map_or(0, |r| r.required_bytes);
        if req.volume_capability.as_ref().map_or(false, VolumeCapability::is_block) {
            return Ok(NodeExpandVolumeResponse { capacity_bytes });
        }
        self.mounter.resize_fs(&req.volume_path).await?;
        info!(volume = %req.volume_id, path = %req.volume_path, "Filesystem expanded");
        Ok(NodeExpandVolumeResponse { capacity_bytes })
    }
}
