use apis::{HaState, LocalVolumeReplica, VolumeConfig, VolumeReplicaEntry};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use system::CommandRunner;
use tracing::{debug, info};

use crate::replication::ReplicationExecutor;
use crate::{AgentError, DrbdConfig, Result};

const DRBDADM: &str = "drbdadm";
const DRBDSETUP: &str = "drbdsetup";
const DRBDMETA: &str = "drbdmeta";
const DRBD_DEVICE_PREFIX: &str = "/dev/drbd";
const MAX_PEERS: &str = "3";

const DISK_UP_TO_DATE: &str = "UpToDate";
const DISK_DISKLESS: &str = "Diskless";
const CONNECTED: &str = "Connected";

/// Renders the resource file of one replicated volume.
pub fn render_resource(
    resource: &str,
    port: i32,
    minor: i32,
    disk: &str,
    peers: &[VolumeReplicaEntry],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "resource {} {{", resource);
    let _ = writeln!(out);
    let _ = writeln!(out, "  net {{");
    let _ = writeln!(out, "    protocol C;");
    let _ = writeln!(out, "  }}");
    for peer in peers {
        let _ = writeln!(out);
        let _ = writeln!(out, "  on {} {{", peer.hostname);
        let _ = writeln!(out, "    device    minor {};", minor);
        let _ = writeln!(out, "    disk      {};", disk);
        let _ = writeln!(out, "    address   {}:{};", peer.ip, port);
        let _ = writeln!(out, "    meta-disk internal;");
        let _ = writeln!(out, "    node-id {};", peer.id);
        let _ = writeln!(out, "  }}");
    }
    let hosts: Vec<&str> = peers.iter().map(|p| p.hostname.as_str()).collect();
    let _ = writeln!(out);
    let _ = writeln!(out, "  connection-mesh {{");
    let _ = writeln!(out, "    hosts {};", hosts.join(" "));
    let _ = writeln!(out, "  }}");
    let _ = writeln!(out, "}}");
    out
}

/// DRBD 9 driven through `drbdadm`. The resource is named after the volume
/// and listens on `start_port + resourceID`, which doubles as the minor.
pub struct DrbdExecutor {
    runner: Arc<dyn CommandRunner>,
    config: DrbdConfig,
    hostname: String,
}

impl DrbdExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, config: DrbdConfig, hostname: &str) -> Self {
        Self {
            runner,
            config,
            hostname: hostname.to_string(),
        }
    }

    pub fn config_path(&self, resource: &str) -> PathBuf {
        self.config.config_dir.join(format!("{}.res", resource))
    }

    fn port(&self, config: &VolumeConfig) -> i32 {
        self.config.start_port + config.resource_id
    }

    async fn drbdadm(&self, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Ok(self.runner.run_checked(DRBDADM, &args).await?)
    }

    /// Local disk state; peers' states after the slash are dropped.
    async fn disk_state(&self, resource: &str) -> Result<String> {
        let out = self.drbdadm(&["dstate", resource]).await?;
        Ok(out.split('/').next().unwrap_or_default().trim().to_string())
    }

    async fn has_metadata(&self, minor: i32, disk: &str) -> Result<bool> {
        let mut args = vec![minor.to_string()];
        args.extend(
            ["v09", disk, "internal", "get-gi", "--node-id", "0", "--force"]
                .iter()
                .map(|s| s.to_string()),
        );
        Ok(self.runner.run(DRBDMETA, &args).await?.code == 0)
    }

    async fn all_peers_connected(&self, resource: &str) -> Result<bool> {
        let out = self.drbdadm(&["cstate", resource]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .all(|s| s == CONNECTED))
    }

    async fn resource_exists(&self, resource: &str) -> Result<bool> {
        let output = self
            .runner
            .run(DRBDSETUP, &["show".to_string(), resource.to_string()])
            .await?;
        Ok(output.code == 0 && !output.stdout.trim().is_empty())
    }
}

async fn link_device(target: &str, link: &str) -> Result<()> {
    if link.is_empty() || tokio::fs::symlink_metadata(link).await.is_ok() {
        return Ok(());
    }
    if let Some(parent) = Path::new(link).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::symlink(target, link).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[async_trait]
impl ReplicationExecutor for DrbdExecutor {
    async fn apply_config(&self, replica: &LocalVolumeReplica, config: &VolumeConfig) -> Result<()> {
        let resource = &replica.spec.volume_name;
        let port = self.port(config);
        info!(replica = %replica.metadata.name, port, "Applying replication config");

        let rendered = render_resource(resource, port, port, &replica.status.storage_path, &config.replicas);
        tokio::fs::create_dir_all(&self.config.config_dir).await?;
        tokio::fs::write(self.config_path(resource), rendered).await?;

        let attached = matches!(self.disk_state(resource).await, Ok(state) if state != DISK_DISKLESS);
        if !attached && !self.has_metadata(port, &replica.status.storage_path).await? {
            self.drbdadm(&["create-md", resource, "--max-peers", MAX_PEERS, "--force"])
                .await?;
        }

        self.drbdadm(&["adjust", resource]).await?;
        link_device(&format!("{}{}", DRBD_DEVICE_PREFIX, port), &replica.status.device_path).await?;
        self.drbdadm(&["resize", resource]).await?;
        Ok(())
    }

    async fn initialize(&self, replica: &LocalVolumeReplica, config: &VolumeConfig) -> Result<()> {
        let resource = &replica.spec.volume_name;
        if config.replica_on(&self.hostname).map_or(true, |r| !r.primary) {
            return Err(AgentError::Replication(format!(
                "{} is not the primary of {}",
                self.hostname, resource
            )));
        }
        if self.disk_state(resource).await? == DISK_UP_TO_DATE {
            debug!("Resource {} already up to date, skip initialize", resource);
            return Ok(());
        }
        if !self.all_peers_connected(resource).await? {
            return Err(AgentError::Replication(format!(
                "not all peers of {} are connected",
                resource
            )));
        }
        // new-current-uuid skips the full initial resync
        self.drbdadm(&["new-current-uuid", resource, "--clear-bitmap"]).await?;
        Ok(())
    }

    async fn delete_config(&self, replica: &LocalVolumeReplica) -> Result<()> {
        let resource = &replica.spec.volume_name;
        info!(replica = %replica.metadata.name, "Deleting replication config");

        if self.resource_exists(resource).await? {
            self.drbdadm(&["down", resource]).await?;
            self.drbdadm(&["wipe-md", resource, "--force"]).await?;
        }
        if !replica.status.device_path.is_empty() && replica.status.device_path != replica.status.storage_path {
            remove_if_exists(Path::new(&replica.status.device_path)).await?;
        }
        remove_if_exists(&self.config_path(resource)).await
    }

    async fn ha_state(&self, replica: &LocalVolumeReplica) -> Result<HaState> {
        match self.disk_state(&replica.spec.volume_name).await?.as_str() {
            DISK_UP_TO_DATE => Ok(HaState::Consistent),
            _ => Ok(HaState::Inconsistent),
        }
    }
}
