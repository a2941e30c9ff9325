use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use system::{CommandRunner, HostCommandRunner};
use tracing::{debug, info};

use crate::{CsiError, CsiResult};

pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Filesystem and mount operations a node needs to serve a volume.
#[async_trait]
pub trait Mounter: Send + Sync {
    async fn is_mount_point(&self, path: &str) -> CsiResult<bool>;

    /// Creates the filesystem if the device has none, then mounts it.
    async fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> CsiResult<()>;

    /// Bind-mounts the device onto a file at `target`.
    async fn mount_raw_block(&self, device: &str, target: &str) -> CsiResult<()>;

    async fn unmount(&self, target: &str) -> CsiResult<()>;

    /// Grows the filesystem mounted at `mount_path` to fill its device.
    async fn resize_fs(&self, mount_path: &str) -> CsiResult<()>;
}

/// Drives the host's mount tools.
pub struct HostMounter {
    runner: Arc<dyn CommandRunner>,
}

impl Default for HostMounter {
    fn default() -> Self {
        Self::new(Arc::new(HostCommandRunner))
    }
}

impl HostMounter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, program: &str, args: &[&str]) -> CsiResult<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Ok(self.runner.run_checked(program, &args).await?)
    }

    /// Filesystem on the device, empty when it is unformatted.
    async fn existing_fs_type(&self, device: &str) -> CsiResult<String> {
        let args = vec![
            "-o".to_string(),
            "value".to_string(),
            "-s".to_string(),
            "TYPE".to_string(),
            device.to_string(),
        ];
        let output = self.runner.run("blkid", &args).await?;
        // blkid exits with 2 when it finds no signature
        match output.code {
            0 => Ok(output.stdout.trim().to_string()),
            2 => Ok(String::new()),
            code => Err(CsiError::System(system::SystemError::CommandFailed {
                command: format!("blkid {}", args.join(" ")),
                code,
                stderr: output.stderr.trim().to_string(),
            })),
        }
    }
}

#[async_trait]
impl Mounter for HostMounter {
    async fn is_mount_point(&self, path: &str) -> CsiResult<bool> {
        if !Path::new(path).exists() {
            return Ok(false);
        }
        let output = self.runner.run("mountpoint", &["-q".to_string(), path.to_string()]).await?;
        Ok(output.code == 0)
    }

    async fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> CsiResult<()> {
        let existing = self.existing_fs_type(device).await?;
        if existing.is_empty() {
            info!(device = %device, fs_type = %fs_type, "Formatting device");
            let force = if fs_type == "xfs" { "-f" } else { "-F" };
            self.run(&format!("mkfs.{}", fs_type), &[force, device]).await?;
        } else if existing != fs_type {
            return Err(CsiError::FailedPrecondition(format!(
                "device {} already has a {} filesystem, requested {}",
                device, existing, fs_type
            )));
        }

        tokio::fs::create_dir_all(target).await.map_err(system::SystemError::from)?;

        let mut args = vec!["-t", fs_type];
        let joined = options.join(",");
        if !joined.is_empty() {
            args.push("-o");
            args.push(&joined);
        }
        args.push(device);
        args.push(target);
        self.run("mount", &args).await?;
        debug!(device = %device, target = %target, "Device mounted");
        Ok(())
    }

    async fn mount_raw_block(&self, device: &str, target: &str) -> CsiResult<()> {
        if let Some(parent) = Path::new(target).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(system::SystemError::from)?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(target)
            .await
            .map_err(system::SystemError::from)?;
        self.run("mount", &["--bind", device, target]).await?;
        debug!(device = %device, target = %target, "Block device bound");
        Ok(())
    }

    async fn unmount(&self, target: &str) -> CsiResult<()> {
        if self.is_mount_point(target).await? {
            self.run("umount", &[target]).await?;
        }
        let removed = match tokio::fs::metadata(target).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(target).await,
            Ok(_) => tokio::fs::remove_file(target).await,
            Err(e) => Err(e),
        };
        match removed {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(CsiError::System(e.into())),
            _ => Ok(()),
        }
    }

    async fn resize_fs(&self, mount_path: &str) -> CsiResult<()> {
        let found = self
            .run("findmnt", &["--noheadings", "--output", "SOURCE,FSTYPE", mount_path])
            .await?;
        let mut fields = found.split_whitespace();
        let (Some(device), Some(fs_type)) = (fields.next(), fields.next()) else {
            return Err(CsiError::NotFound(format!("{} is not mounted", mount_path)));
        };

        info!(device = %device, fs_type = %fs_type, path = %mount_path, "Growing filesystem");
        match fs_type {
            "xfs" => self.run("xfs_growfs", &[mount_path]).await?,
            "ext2" | "ext3" | "ext4" => self.run("resize2fs", &[device]).await?,
            other => {
                return Err(CsiError::InvalidArgument(format!(
                    "cannot grow {} filesystem",
                    other
                )))
            }
        };
        Ok(())
    }
}
