use apis::{
    Api, LocalVolume, LocalVolumeExpand, LocalVolumeGroup, LocalVolumeReplica,
    LocalVolumeSnapshotRestore, RecordStore, CSI_DRIVER_NAME,
};
use async_trait::async_trait;
use scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use system::AuthConfig;
use tokio::sync::Mutex;
use volumegroup::VolumeGroupManager;

use crate::mounter::Mounter;
use crate::types::*;
use crate::{CsiError, CsiResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_name: String,
    pub namespace: String,
    /// `unix:///path/csi.sock` (or a bare path) or `tcp://host:port`.
    pub address: String,
    /// Extra readiness checks a create makes before giving up.
    pub create_retry_count: u32,
    pub create_retry_delay_ms: u64,
    pub vendor_version: String,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            namespace: String::new(),
            address: DEFAULT_ADDRESS.to_string(),
            create_retry_count: 3,
            create_retry_delay_ms: 5_000,
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    pub fn create_retry_delay(&self) -> Duration {
        Duration::from_millis(self.create_retry_delay_ms)
    }

    pub fn endpoint(&self) -> CsiResult<Endpoint> {
        Endpoint::parse(&self.address)
    }
}

pub const DEFAULT_ADDRESS: &str = "unix:///csi/csi.sock";

/// Where the plugin listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    pub fn parse(address: &str) -> CsiResult<Self> {
        if let Some(addr) = address.strip_prefix("tcp://") {
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        let path = address.strip_prefix("unix://").unwrap_or(address);
        if path.is_empty() || path.contains("://") {
            return Err(CsiError::InvalidArgument(format!("unsupported plugin address {:?}", address)));
        }
        Ok(Endpoint::Unix(PathBuf::from(path)))
    }
}

#[async_trait]
pub trait Identity: Send + Sync {
    async fn get_plugin_info(&self) -> CsiResult<GetPluginInfoResponse>;
    async fn get_plugin_capabilities(&self) -> CsiResult<GetPluginCapabilitiesResponse>;
    async fn probe(&self) -> CsiResult<ProbeResponse>;
}

#[async_trait]
pub trait Controller: Send + Sync {
    async fn create_volume(&self, req: CreateVolumeRequest) -> CsiResult<CreateVolumeResponse>;
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> CsiResult<Empty>;
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> CsiResult<ControllerPublishVolumeResponse>;
    async fn controller_unpublish_volume(&self, req: ControllerUnpublishVolumeRequest) -> CsiResult<Empty>;
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> CsiResult<ValidateVolumeCapabilitiesResponse>;
    async fn list_volumes(&self, req: ListVolumesRequest) -> CsiResult<ListVolumesResponse>;
    async fn controller_get_volume(&self, req: ControllerGetVolumeRequest) -> CsiResult<ControllerGetVolumeResponse>;
    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> CsiResult<ControllerExpandVolumeResponse>;
    async fn get_capacity(&self) -> CsiResult<Empty>;
    async fn controller_get_capabilities(&self) -> CsiResult<ControllerGetCapabilitiesResponse>;
}

#[async_trait]
pub trait Node: Send + Sync {
    async fn node_get_info(&self) -> CsiResult<NodeGetInfoResponse>;
    async fn node_get_capabilities(&self) -> CsiResult<NodeGetCapabilitiesResponse>;
    async fn node_publish_volume(&self, req: NodePublishVolumeRequest) -> CsiResult<Empty>;
    async fn node_unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> CsiResult<Empty>;
    async fn node_expand_volume(&self, req: NodeExpandVolumeRequest) -> CsiResult<NodeExpandVolumeResponse>;
}

/// The volume plugin: the controller side talks to the record store and the
/// scheduler, the node side to the local mounter.
pub struct Plugin {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) volumes: Api<LocalVolume>,
    pub(crate) replicas: Api<LocalVolumeReplica>,
    pub(crate) expands: Api<LocalVolumeExpand>,
    pub(crate) restores: Api<LocalVolumeSnapshotRestore>,
    pub(crate) groups: Api<LocalVolumeGroup>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) group_manager: Arc<VolumeGroupManager>,
    pub(crate) mounter: Arc<dyn Mounter>,
    /// Serializes volume creation so group resolution sees its own writes.
    pub(crate) create_lock: Mutex<()>,
}

impl Plugin {
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        scheduler: Arc<Scheduler>,
        group_manager: Arc<VolumeGroupManager>,
        mounter: Arc<dyn Mounter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            volumes: Api::all(store.clone()),
            replicas: Api::all(store.clone()),
            expands: Api::all(store.clone()),
            restores: Api::all(store.clone()),
            groups: Api::all(store.clone()),
            store,
            scheduler,
            group_manager,
            mounter,
            create_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[async_trait]
impl Identity for Plugin {
    async fn get_plugin_info(&self) -> CsiResult<GetPluginInfoResponse> {
        Ok(GetPluginInfoResponse {
            name: CSI_DRIVER_NAME.to_string(),
            vendor_version: self.config.vendor_version.clone(),
        })
    }

    async fn get_plugin_capabilities(&self) -> CsiResult<GetPluginCapabilitiesResponse> {
        Ok(GetPluginCapabilitiesResponse {
            capabilities: vec![
                PluginCapability::ControllerService,
                PluginCapability::VolumeAccessibilityConstraints,
            ],
        })
    }

    async fn probe(&self) -> CsiResult<ProbeResponse> {
        Ok(ProbeResponse { ready: true })
    }
}
