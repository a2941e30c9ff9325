//! The CSI v1 gRPC surface: generated wire messages, their conversions to
//! the plugin's own types and the service shims the server mounts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::plugin::{Controller, Identity, Node, Plugin};
use crate::types::*;
use crate::CsiError;

pub mod pb {
    #![allow(clippy::all)]
    tonic::include_proto!("csi.v1");
}

use pb::controller_service_capability::rpc::Type as ControllerRpcType;
use pb::node_service_capability::rpc::Type as NodeRpcType;
use pb::plugin_capability::service::Type as ServiceType;
use pb::volume_capability::access_mode::Mode;

type RpcResult<T> = Result<Response<T>, Status>;

fn sorted(map: HashMap<String, String>) -> BTreeMap<String, String> {
    map.into_iter().collect()
}

fn unsorted(map: BTreeMap<String, String>) -> HashMap<String, String> {
    map.into_iter().collect()
}

impl From<pb::Topology> for Topology {
    fn from(t: pb::Topology) -> Self {
        Topology {
            segments: sorted(t.segments),
        }
    }
}

impl From<Topology> for pb::Topology {
    fn from(t: Topology) -> Self {
        pb::Topology {
            segments: unsorted(t.segments),
        }
    }
}

impl From<pb::TopologyRequirement> for TopologyRequirement {
    fn from(r: pb::TopologyRequirement) -> Self {
        TopologyRequirement {
            requisite: r.requisite.into_iter().map(Into::into).collect(),
            preferred: r.preferred.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<pb::CapacityRange> for CapacityRange {
    fn from(r: pb::CapacityRange) -> Self {
        CapacityRange {
            required_bytes: r.required_bytes,
            limit_bytes: r.limit_bytes,
        }
    }
}

impl From<Mode> for AccessMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Unknown => AccessMode::Unknown,
            Mode::SingleNodeWriter => AccessMode::SingleNodeWriter,
            Mode::SingleNodeReaderOnly => AccessMode::SingleNodeReaderOnly,
            Mode::MultiNodeReaderOnly => AccessMode::MultiNodeReaderOnly,
            Mode::MultiNodeSingleWriter => AccessMode::MultiNodeSingleWriter,
            Mode::MultiNodeMultiWriter => AccessMode::MultiNodeMultiWriter,
            Mode::SingleNodeSingleWriter => AccessMode::SingleNodeSingleWriter,
            Mode::SingleNodeMultiWriter => AccessMode::SingleNodeMultiWriter,
        }
    }
}

impl From<AccessMode> for Mode {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Unknown => Mode::Unknown,
            AccessMode::SingleNodeWriter => Mode::SingleNodeWriter,
            AccessMode::SingleNodeReaderOnly => Mode::SingleNodeReaderOnly,
            AccessMode::MultiNodeReaderOnly => Mode::MultiNodeReaderOnly,
            AccessMode::MultiNodeSingleWriter => Mode::MultiNodeSingleWriter,
            AccessMode::MultiNodeMultiWriter => Mode::MultiNodeMultiWriter,
            AccessMode::SingleNodeSingleWriter => Mode::SingleNodeSingleWriter,
            AccessMode::SingleNodeMultiWriter => Mode::SingleNodeMultiWriter,
        }
    }
}

impl TryFrom<pb::VolumeCapability> for VolumeCapability {
    type Error = CsiError;

    fn try_from(c: pb::VolumeCapability) -> Result<Self, Self::Error> {
        let access_type = match c.access_type {
            Some(pb::volume_capability::AccessType::Block(_)) => AccessType::Block,
            Some(pb::volume_capability::AccessType::Mount(m)) => AccessType::Mount(MountVolume {
                fs_type: m.fs_type,
                mount_flags: m.mount_flags,
            }),
            None => return Err(CsiError::InvalidArgument("volume capability without access type".to_string())),
        };
        let access_mode = c.access_mode.map_or(AccessMode::Unknown, |m| m.mode().into());
        Ok(VolumeCapability {
            access_mode,
            access_type,
        })
    }
}

impl From<VolumeCapability> for pb::VolumeCapability {
    fn from(c: VolumeCapability) -> Self {
        let access_type = match c.access_type {
            AccessType::Block => pb::volume_capability::AccessType::Block(Default::default()),
            AccessType::Mount(m) => pb::volume_capability::AccessType::Mount(pb::volume_capability::MountVolume {
                fs_type: m.fs_type,
                mount_flags: m.mount_flags,
                volume_mount_group: String::new(),
            }),
        };
        pb::VolumeCapability {
            access_mode: Some(pb::volume_capability::AccessMode {
                mode: Mode::from(c.access_mode) as i32,
            }),
            access_type: Some(access_type),
        }
    }
}

fn capabilities(list: Vec<pb::VolumeCapability>) -> Result<Vec<VolumeCapability>, CsiError> {
    list.into_iter().map(TryInto::try_into).collect()
}

fn capability(c: Option<pb::VolumeCapability>) -> Result<Option<VolumeCapability>, CsiError> {
    c.map(TryInto::try_into).transpose()
}

impl From<pb::VolumeContentSource> for VolumeContentSource {
    fn from(s: pb::VolumeContentSource) -> Self {
        match s.r#type {
            Some(pb::volume_content_source::Type::Snapshot(snap)) => VolumeContentSource {
                snapshot_id: Some(snap.snapshot_id),
                volume_id: None,
            },
            Some(pb::volume_content_source::Type::Volume(vol)) => VolumeContentSource {
                snapshot_id: None,
                volume_id: Some(vol.volume_id),
            },
            None => VolumeContentSource::default(),
        }
    }
}

impl From<Volume> for pb::Volume {
    fn from(v: Volume) -> Self {
        pb::Volume {
            capacity_bytes: v.capacity_bytes,
            volume_id: v.volume_id,
            volume_context: unsorted(v.volume_context),
            content_source: None,
            accessible_topology: v.accessible_topology.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<VolumeCondition> for pb::VolumeCondition {
    fn from(c: VolumeCondition) -> Self {
        pb::VolumeCondition {
            abnormal: c.abnormal,
            message: c.message,
        }
    }
}

/// Identity service over a shared plugin.
#[derive(Clone)]
pub struct IdentityService(pub Arc<Plugin>);

/// Controller service over a shared plugin.
#[derive(Clone)]
pub struct ControllerService(pub Arc<Plugin>);

/// Node service over a shared plugin.
#[derive(Clone)]
pub struct NodeService(pub Arc<Plugin>);

#[tonic::async_trait]
impl pb::identity_server::Identity for IdentityService {
    async fn get_plugin_info(&self, _: Request<pb::GetPluginInfoRequest>) -> RpcResult<pb::GetPluginInfoResponse> {
        let info = self.0.get_plugin_info().await?;
        Ok(Response::new(pb::GetPluginInfoResponse {
            name: info.name,
            vendor_version: info.vendor_version,
            manifest: HashMap::new(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _: Request<pb::GetPluginCapabilitiesRequest>,
    ) -> RpcResult<pb::GetPluginCapabilitiesResponse> {
        let caps = self.0.get_plugin_capabilities().await?;
        let capabilities = caps
            .capabilities
            .into_iter()
            .map(|cap| {
                let service = match cap {
                    PluginCapability::ControllerService => ServiceType::ControllerService,
                    PluginCapability::VolumeAccessibilityConstraints => ServiceType::VolumeAccessibilityConstraints,
                };
                pb::PluginCapability {
                    r#type: Some(pb::plugin_capability::Type::Service(pb::plugin_capability::Service {
                        r#type: service as i32,
                    })),
                }
            })
            .collect();
        Ok(Response::new(pb::GetPluginCapabilitiesResponse { capabilities }))
    }

    async fn probe(&self, _: Request<pb::ProbeRequest>) -> RpcResult<pb::ProbeResponse> {
        let health = self.0.probe().await?;
        Ok(Response::new(pb::ProbeResponse {
            ready: Some(health.ready),
        }))
    }
}

fn volume_status_parts(status: VolumeStatus) -> (Vec<String>, Option<pb::VolumeCondition>) {
    (status.published_node_ids, Some(status.volume_condition.into()))
}

#[tonic::async_trait]
impl pb::controller_server::Controller for ControllerService {
    async fn create_volume(&self, request: Request<pb::CreateVolumeRequest>) -> RpcResult<pb::CreateVolumeResponse> {
        let req = request.into_inner();
        let req = CreateVolumeRequest {
            name: req.name,
            capacity_range: req.capacity_range.map(Into::into),
            volume_capabilities: capabilities(req.volume_capabilities)?,
            parameters: sorted(req.parameters),
            accessibility_requirements: req.accessibility_requirements.map(Into::into),
            volume_content_source: req.volume_content_source.map(Into::into),
        };
        let resp = self.0.create_volume(req).await?;
        Ok(Response::new(pb::CreateVolumeResponse {
            volume: Some(resp.volume.into()),
        }))
    }

    async fn delete_volume(&self, request: Request<pb::DeleteVolumeRequest>) -> RpcResult<pb::DeleteVolumeResponse> {
        let volume_id = request.into_inner().volume_id;
        self.0.delete_volume(DeleteVolumeRequest { volume_id }).await?;
        Ok(Response::new(pb::DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        request: Request<pb::ControllerPublishVolumeRequest>,
    ) -> RpcResult<pb::ControllerPublishVolumeResponse> {
        let req = request.into_inner();
        let req = ControllerPublishVolumeRequest {
            volume_id: req.volume_id,
            node_id: req.node_id,
            volume_capability: capability(req.volume_capability)?,
            readonly: req.readonly,
        };
        let resp = self.0.controller_publish_volume(req).await?;
        Ok(Response::new(pb::ControllerPublishVolumeResponse {
            publish_context: unsorted(resp.publish_context),
        }))
    }

    async fn controller_unpublish_volume(
        &self,
        request: Request<pb::ControllerUnpublishVolumeRequest>,
    ) -> RpcResult<pb::ControllerUnpublishVolumeResponse> {
        let req = request.into_inner();
        self.0
            .controller_unpublish_volume(ControllerUnpublishVolumeRequest {
                volume_id: req.volume_id,
                node_id: req.node_id,
            })
            .await?;
        Ok(Response::new(pb::ControllerUnpublishVolumeResponse {}))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<pb::ValidateVolumeCapabilitiesRequest>,
    ) -> RpcResult<pb::ValidateVolumeCapabilitiesResponse> {
        let req = request.into_inner();
        let volume_context = req.volume_context.clone();
        let parameters = req.parameters.clone();
        let resp = self
            .0
            .validate_volume_capabilities(ValidateVolumeCapabilitiesRequest {
                volume_id: req.volume_id,
                volume_capabilities: capabilities(req.volume_capabilities)?,
            })
            .await?;
        let confirmed = resp
            .confirmed
            .map(|caps| pb::validate_volume_capabilities_response::Confirmed {
                volume_context,
                volume_capabilities: caps.into_iter().map(Into::into).collect(),
                parameters,
                mutable_parameters: HashMap::new(),
            });
        Ok(Response::new(pb::ValidateVolumeCapabilitiesResponse {
            confirmed,
            message: resp.message,
        }))
    }

    async fn list_volumes(&self, request: Request<pb::ListVolumesRequest>) -> RpcResult<pb::ListVolumesResponse> {
        let req = request.into_inner();
        let resp = self
            .0
            .list_volumes(ListVolumesRequest {
                max_entries: req.max_entries,
                starting_token: req.starting_token,
            })
            .await?;
        let entries = resp
            .entries
            .into_iter()
            .map(|entry| {
                let (published_node_ids, volume_condition) = volume_status_parts(entry.status);
                pb::list_volumes_response::Entry {
                    volume: Some(entry.volume.into()),
                    status: Some(pb::list_volumes_response::VolumeStatus {
                        published_node_ids,
                        volume_condition,
                    }),
                }
            })
            .collect();
        Ok(Response::new(pb::ListVolumesResponse {
            entries,
            next_token: resp.next_token,
        }))
    }

    async fn get_capacity(&self, _: Request<pb::GetCapacityRequest>) -> RpcResult<pb::GetCapacityResponse> {
        self.0.get_capacity().await?;
        Err(Status::unimplemented("GetCapacity"))
    }

    async fn controller_get_capabilities(
        &self,
        _: Request<pb::ControllerGetCapabilitiesRequest>,
    ) -> RpcResult<pb::ControllerGetCapabilitiesResponse> {
        let caps = self.0.controller_get_capabilities().await?;
        let capabilities = caps
            .capabilities
            .into_iter()
            .map(|cap| {
                let rpc = match cap {
                    ControllerCapability::CreateDeleteVolume => ControllerRpcType::CreateDeleteVolume,
                    ControllerCapability::PublishUnpublishVolume => ControllerRpcType::PublishUnpublishVolume,
                    ControllerCapability::ExpandVolume => ControllerRpcType::ExpandVolume,
                    ControllerCapability::ListVolumes => ControllerRpcType::ListVolumes,
                    ControllerCapability::ListVolumesPublishedNodes => ControllerRpcType::ListVolumesPublishedNodes,
                    ControllerCapability::GetVolume => ControllerRpcType::GetVolume,
                    ControllerCapability::VolumeCondition => ControllerRpcType::VolumeCondition,
                };
                pb::ControllerServiceCapability {
                    r#type: Some(pb::controller_service_capability::Type::Rpc(
                        pb::controller_service_capability::Rpc { r#type: rpc as i32 },
                    )),
                }
            })
            .collect();
        Ok(Response::new(pb::ControllerGetCapabilitiesResponse { capabilities }))
    }

    async fn controller_expand_volume(
        &self,
        request: Request<pb::ControllerExpandVolumeRequest>,
    ) -> RpcResult<pb::ControllerExpandVolumeResponse> {
        let req = request.into_inner();
        let resp = self
            .0
            .controller_expand_volume(ControllerExpandVolumeRequest {
                volume_id: req.volume_id,
                capacity_range: req.capacity_range.map(Into::into),
                volume_capability: capability(req.volume_capability)?,
            })
            .await?;
        Ok(Response::new(pb::ControllerExpandVolumeResponse {
            capacity_bytes: resp.capacity_bytes,
            node_expansion_required: resp.node_expansion_required,
        }))
    }

    async fn controller_get_volume(
        &self,
        request: Request<pb::ControllerGetVolumeRequest>,
    ) -> RpcResult<pb::ControllerGetVolumeResponse> {
        let volume_id = request.into_inner().volume_id;
        let resp = self.0.controller_get_volume(ControllerGetVolumeRequest { volume_id }).await?;
        Ok(Response::new(pb::ControllerGetVolumeResponse {
            volume: resp.volume.map(Into::into),
            status: resp.status.map(|status| {
                let (published_node_ids, volume_condition) = volume_status_parts(status);
                pb::controller_get_volume_response::VolumeStatus {
                    published_node_ids,
                    volume_condition,
                }
            }),
        }))
    }
}

#[tonic::async_trait]
impl pb::node_server::Node for NodeService {
    async fn node_publish_volume(
        &self,
        request: Request<pb::NodePublishVolumeRequest>,
    ) -> RpcResult<pb::NodePublishVolumeResponse> {
        let req = request.into_inner();
        self.0
            .node_publish_volume(NodePublishVolumeRequest {
                volume_id: req.volume_id,
                publish_context: sorted(req.publish_context),
                target_path: req.target_path,
                volume_capability: capability(req.volume_capability)?,
                readonly: req.readonly,
            })
            .await?;
        Ok(Response::new(pb::NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<pb::NodeUnpublishVolumeRequest>,
    ) -> RpcResult<pb::NodeUnpublishVolumeResponse> {
        let req = request.into_inner();
        self.0
            .node_unpublish_volume(NodeUnpublishVolumeRequest {
                volume_id: req.volume_id,
                target_path: req.target_path,
            })
            .await?;
        Ok(Response::new(pb::NodeUnpublishVolumeResponse {}))
    }

    async fn node_expand_volume(
        &self,
        request: Request<pb::NodeExpandVolumeRequest>,
    ) -> RpcResult<pb::NodeExpandVolumeResponse> {
        let req = request.into_inner();
        let resp = self
            .0
            .node_expand_volume(NodeExpandVolumeRequest {
                volume_id: req.volume_id,
                volume_path: req.volume_path,
                capacity_range: req.capacity_range.map(Into::into),
                volume_capability: capability(req.volume_capability)?,
            })
            .await?;
        Ok(Response::new(pb::NodeExpandVolumeResponse {
            capacity_bytes: resp.capacity_bytes,
        }))
    }

    async fn node_get_capabilities(
        &self,
        _: Request<pb::NodeGetCapabilitiesRequest>,
    ) -> RpcResult<pb::NodeGetCapabilitiesResponse> {
        let caps = self.0.node_get_capabilities().await?;
        let capabilities = caps
            .capabilities
            .into_iter()
            .map(|cap| {
                let rpc = match cap {
                    NodeCapability::ExpandVolume => NodeRpcType::ExpandVolume,
                };
                pb::NodeServiceCapability {
                    r#type: Some(pb::node_service_capability::Type::Rpc(pb::node_service_capability::Rpc {
                        r#type: rpc as i32,
                    })),
                }
            })
            .collect();
        Ok(Response::new(pb::NodeGetCapabilitiesResponse { capabilities }))
    }

    async fn node_get_info(&self, _: Request<pb::NodeGetInfoRequest>) -> RpcResult<pb::NodeGetInfoResponse> {
        let info = self.0.node_get_info().await?;
        Ok(Response::new(pb::NodeGetInfoResponse {
            node_id: info.node_id,
            max_volumes_per_node: 0,
            accessible_topology: Some(info.accessible_topology.into()),
        }))
    }
}
