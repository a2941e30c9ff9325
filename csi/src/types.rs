//! Request and response messages of the Identity, Controller and Node
//! services as the plugin handles them. The wire messages in `grpc` convert
//! to and from these.

use std::collections::BTreeMap;

pub const DEVICE_PATH_KEY: &str = "devicePath";
pub const REPLICA_NAME_KEY: &str = "replicaName";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Empty {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub segments: BTreeMap<String, String>,
}

impl Topology {
    pub fn node(node: &str) -> Self {
        let mut segments = BTreeMap::new();
        segments.insert(apis::TOPOLOGY_NODE_KEY.to_string(), node.to_string());
        Self { segments }
    }

    pub fn node_name(&self) -> Option<&str> {
        self.segments.get(apis::TOPOLOGY_NODE_KEY).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyRequirement {
    pub requisite: Vec<Topology>,
    pub preferred: Vec<Topology>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    Unknown,
    #[default]
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
    SingleNodeSingleWriter,
    SingleNodeMultiWriter,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountVolume {
    pub fs_type: String,
    pub mount_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessType {
    Block,
    Mount(MountVolume),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCapability {
    pub access_mode: AccessMode,
    pub access_type: AccessType,
}

impl VolumeCapability {
    pub fn is_block(&self) -> bool {
        matches!(self.access_type, AccessType::Block)
    }

    pub fn mount(fs_type: &str) -> Self {
        Self {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: AccessType::Mount(MountVolume {
                fs_type: fs_type.to_string(),
                mount_flags: Vec::new(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CapacityRange {
    pub required_bytes: i64,
    pub limit_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeContentSource {
    pub snapshot_id: Option<String>,
    pub volume_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Volume {
    pub volume_id: String,
    pub capacity_bytes: i64,
    pub volume_context: BTreeMap<String, String>,
    pub accessible_topology: Vec<Topology>,
}

// Identity

#[derive(Debug, Clone, PartialEq)]
pub struct GetPluginInfoResponse {
    pub name: String,
    pub vendor_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCapability {
    ControllerService,
    VolumeAccessibilityConstraints,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetPluginCapabilitiesResponse {
    pub capabilities: Vec<PluginCapability>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResponse {
    pub ready: bool,
}

// Controller

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub capacity_range: Option<CapacityRange>,
    pub volume_capabilities: Vec<VolumeCapability>,
    pub parameters: BTreeMap<String, String>,
    pub accessibility_requirements: Option<TopologyRequirement>,
    pub volume_content_source: Option<VolumeContentSource>,
}

impl CreateVolumeRequest {
    pub fn required_bytes(&self) -> i64 {
        self.capacity_range.map_or(0, |r| r.required_bytes)
    }

    /// Node of the first requisite topology segment.
    pub fn requisite_node(&self) -> Option<&str> {
        self.accessibility_requirements
            .as_ref()
            .and_then(|r| r.requisite.first())
            .and_then(Topology::node_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateVolumeResponse {
    pub volume: Volume,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteVolumeRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerPublishVolumeRequest {
    pub volume_id: String,
    pub node_id: String,
    pub volume_capability: Option<VolumeCapability>,
    pub readonly: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerPublishVolumeResponse {
    pub publish_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerUnpublishVolumeRequest {
    pub volume_id: String,
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidateVolumeCapabilitiesRequest {
    pub volume_id: String,
    pub volume_capabilities: Vec<VolumeCapability>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidateVolumeCapabilitiesResponse {
    pub confirmed: Option<Vec<VolumeCapability>>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListVolumesRequest {
    pub max_entries: i32,
    pub starting_token: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeCondition {
    pub abnormal: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeStatus {
    pub published_node_ids: Vec<String>,
    pub volume_condition: VolumeCondition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListVolumesEntry {
    pub volume: Volume,
    pub status: VolumeStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListVolumesResponse {
    pub entries: Vec<ListVolumesEntry>,
    pub next_token: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerGetVolumeRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerGetVolumeResponse {
    pub volume: Option<Volume>,
    pub status: Option<VolumeStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerExpandVolumeRequest {
    pub volume_id: String,
    pub capacity_range: Option<CapacityRange>,
    pub volume_capability: Option<VolumeCapability>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerExpandVolumeResponse {
    pub capacity_bytes: i64,
    pub node_expansion_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ExpandVolume,
    ListVolumes,
    ListVolumesPublishedNodes,
    GetVolume,
    VolumeCondition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerGetCapabilitiesResponse {
    pub capabilities: Vec<ControllerCapability>,
}

// Node

#[derive(Debug, Clone, PartialEq)]
pub struct NodeGetInfoResponse {
    pub node_id: String,
    pub accessible_topology: Topology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCapability {
    ExpandVolume,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeGetCapabilitiesResponse {
    pub capabilities: Vec<NodeCapability>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePublishVolumeRequest {
    pub volume_id: String,
    pub publish_context: BTreeMap<String, String>,
    pub target_path: String,
    pub volume_capability: Option<VolumeCapability>,
    pub readonly: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeExpandVolumeRequest {
    pub volume_id: String,
    pub volume_path: String,
    pub capacity_range: Option<CapacityRange>,
    pub volume_capability: Option<VolumeCapability>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeExpandVolumeResponse {
    pub capacity_bytes: i64,
}
