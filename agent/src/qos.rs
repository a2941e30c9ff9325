use apis::VolumeQoS;
use async_trait::async_trait;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{AgentError, Result};

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Pods cgroup the limits are written under on the unified hierarchy.
const PODS_CGROUP: &str = "kubepods";

/// Block I/O limits of one device. Zero lifts the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoLimits {
    pub iops: i64,
    /// Bytes per second.
    pub throughput: i64,
}

impl IoLimits {
    pub fn parse(qos: &VolumeQoS) -> Result<Self> {
        let value = |raw: &str| -> Result<i64> {
            if raw.is_empty() {
                return Ok(0);
            }
            let parsed = system::parse_bytes(raw)?;
            if parsed < 0 {
                return Err(AgentError::Parse(format!("negative I/O limit {}", raw)));
            }
            Ok(parsed)
        };
        Ok(Self {
            iops: value(&qos.iops)?,
            throughput: value(&qos.throughput)?,
        })
    }
}

/// Applies block I/O limits to a replica's device.
#[async_trait]
pub trait QosExecutor: Send + Sync {
    async fn apply(&self, device_path: &str, limits: IoLimits) -> Result<()>;
}

/// Major and minor numbers of a `st_rdev`, glibc encoding.
pub fn device_numbers(rdev: u64) -> (u64, u64) {
    let major = ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff);
    let minor = (rdev & 0xff) | ((rdev >> 12) & !0xff);
    (major, minor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hierarchy {
    /// cgroup v1 blkio throttling.
    Legacy,
    /// cgroup v2, mounted at the root or under `unified/` on hybrid hosts.
    Unified,
    Hybrid,
}

/// Throttles devices through the blkio (v1) or io (v2) cgroup controller.
pub struct CgroupQos {
    root: PathBuf,
}

impl CgroupQos {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn hierarchy(&self) -> Option<Hierarchy> {
        if self.root.join("cgroup.controllers").exists() {
            Some(Hierarchy::Unified)
        } else if self.root.join("unified").join("cgroup.controllers").exists() {
            Some(Hierarchy::Hybrid)
        } else if self.root.join("blkio").is_dir() {
            Some(Hierarchy::Legacy)
        } else {
            None
        }
    }

    /// Writes the limits of device `major:minor`.
    pub async fn apply_device(&self, major: u64, minor: u64, limits: IoLimits) -> Result<()> {
        let device = format!("{}:{}", major, minor);
        let writes = match self.hierarchy() {
            Some(Hierarchy::Legacy) => legacy_writes(&self.root.join("blkio"), &device, limits),
            Some(Hierarchy::Unified) => vec![unified_write(&self.root, &device, limits)],
            Some(Hierarchy::Hybrid) => vec![unified_write(&self.root.join("unified"), &device, limits)],
            None => {
                return Err(AgentError::Parse(format!(
                    "no blkio or io cgroup controller under {}",
                    self.root.display()
                )))
            }
        };
        for (path, line) in writes {
            debug!(path = %path.display(), limit = %line, "Writing I/O limit");
            tokio::fs::write(&path, line).await?;
        }
        Ok(())
    }
}

fn legacy_writes(blkio: &Path, device: &str, limits: IoLimits) -> Vec<(PathBuf, String)> {
    let throughput = format!("{} {}", device, limits.throughput);
    let iops = format!("{} {}", device, limits.iops);
    vec![
        (blkio.join("blkio.throttle.read_bps_device"), throughput.clone()),
        (blkio.join("blkio.throttle.write_bps_device"), throughput),
        (blkio.join("blkio.throttle.read_iops_device"), iops.clone()),
        (blkio.join("blkio.throttle.write_iops_device"), iops),
    ]
}

fn unified_write(root: &Path, device: &str, limits: IoLimits) -> (PathBuf, String) {
    let limit = |v: i64| if v > 0 { v.to_string() } else { "max".to_string() };
    let bps = limit(limits.throughput);
    let iops = limit(limits.iops);
    (
        root.join(PODS_CGROUP).join("io.max"),
        format!("{} rbps={} wbps={} riops={} wiops={}", device, bps, bps, iops, iops),
    )
}

#[async_trait]
impl QosExecutor for CgroupQos {
    async fn apply(&self, device_path: &str, limits: IoLimits) -> Result<()> {
        let rdev = tokio::fs::metadata(device_path).await?.rdev();
        let (major, minor) = device_numbers(rdev);
        self.apply_device(major, minor, limits).await
    }
}
