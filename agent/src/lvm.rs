use apis::{
    round_to_extent, DeviceState, DiskClass, LocalDevice, LocalPool, LocalVolumeReplica,
    LocalVolumeReplicaStatus, PoolType, ReplicaState, LVM_VOLUME_MAX_COUNT, POOL_NAME_PREFIX,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use system::{parse_bytes, CommandRunner};
use tracing::{debug, info};

use crate::executor::{HostVolume, PoolExecutor, VolumeExecutor};
use crate::{AgentError, Result};

#[derive(Debug, Deserialize)]
struct Report<S> {
    #[serde(default = "Vec::new")]
    report: Vec<S>,
}

#[derive(Debug, Deserialize)]
struct PvSection {
    #[serde(default)]
    pv: Vec<PvRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct PvRecord {
    pv_name: String,
    #[serde(default)]
    vg_name: String,
    #[serde(default)]
    pv_size: String,
}

#[derive(Debug, Deserialize)]
struct VgSection {
    #[serde(default)]
    vg: Vec<VgRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct VgRecord {
    vg_name: String,
    vg_size: String,
    vg_free: String,
}

#[derive(Debug, Deserialize)]
struct LvSection {
    #[serde(default)]
    lv: Vec<LvRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct LvRecord {
    lv_path: String,
    lv_name: String,
    vg_name: String,
    lv_size: String,
}

/// State and backing disks of one logical volume, from `lvdisplay -m`.
#[derive(Debug, Clone, PartialEq)]
struct LvStatus {
    disks: Vec<String>,
    state: ReplicaState,
}

/// Pools are volume groups named `LocalStorage_Pool<class>`; replicas are
/// logical volumes named after their volume.
pub struct LvmExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl LvmExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn report<S: DeserializeOwned>(&self, program: &str, extra: &[&str]) -> Result<Vec<S>> {
        let mut args: Vec<String> = extra.iter().map(|s| s.to_string()).collect();
        args.extend(["--reportformat", "json", "--units", "B"].iter().map(|s| s.to_string()));
        let stdout = self.runner.run_checked(program, &args).await?;
        let report: Report<S> = serde_json::from_str(&stdout)
            .map_err(|e| AgentError::Parse(format!("{} report: {}", program, e)))?;
        Ok(report.report)
    }

    async fn pvs(&self) -> Result<Vec<PvRecord>> {
        let sections: Vec<PvSection> = self.report("pvs", &[]).await?;
        Ok(sections.into_iter().flat_map(|s| s.pv).collect())
    }

    async fn vgs(&self) -> Result<Vec<VgRecord>> {
        let sections: Vec<VgSection> = self.report("vgs", &[]).await?;
        Ok(sections.into_iter().flat_map(|s| s.vg).collect())
    }

    async fn lvs(&self) -> Result<Vec<LvRecord>> {
        let sections: Vec<LvSection> = self
            .report("lvs", &["-o", "lv_path,lv_name,vg_name,lv_size"])
            .await?;
        Ok(sections.into_iter().flat_map(|s| s.lv).collect())
    }

    async fn lv_record(&self, pool: &str, name: &str) -> Result<LvRecord> {
        self.lvs()
            .await?
            .into_iter()
            .find(|lv| lv.vg_name == pool && lv.lv_name == name)
            .ok_or_else(|| AgentError::VolumeNotFound(format!("{}/{}", pool, name)))
    }

    async fn lvdisplay(&self, path: &str) -> Result<LvStatus> {
        let stdout = self
            .runner
            .run_checked("lvdisplay", &["-m".to_string(), path.to_string()])
            .await?;
        Ok(parse_lvdisplay(&stdout))
    }

    async fn extend_pool(&self, pool: &str, pvs: &[String], pool_exists: bool) -> Result<()> {
        let mut args = vec![pool.to_string(), "-y".to_string()];
        args.extend(pvs.iter().cloned());
        let program = if pool_exists { "vgextend" } else { "vgcreate" };
        info!("Adding disks {:?} to pool {} with {}", pvs, pool, program);
        self.runner.run_checked(program, &args).await?;
        Ok(())
    }
}

fn storage_path(replica: &LocalVolumeReplica) -> &str {
    if replica.status.storage_path.is_empty() {
        &replica.status.device_path
    } else {
        &replica.status.storage_path
    }
}

fn parse_lvdisplay(output: &str) -> LvStatus {
    let mut status = LvStatus {
        disks: Vec::new(),
        state: ReplicaState::NotReady,
    };
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(disk) = line.strip_prefix("Physical volume") {
            status.disks.push(disk.trim().to_string());
        } else if let Some(state) = line.strip_prefix("LV Status") {
            if state.trim() == "available" {
                status.state = ReplicaState::Ready;
            }
        }
    }
    status
}

#[async_trait]
impl PoolExecutor for LvmExecutor {
    async fn get_pools(&self) -> Result<BTreeMap<String, LocalPool>> {
        let vgs = self.vgs().await?;
        let pvs = self.pvs().await?;
        let lvs = self.lvs().await?;

        let mut pools = BTreeMap::new();
        for vg in vgs.into_iter().filter(|vg| vg.vg_name.starts_with(POOL_NAME_PREFIX)) {
            let Some(class) = DiskClass::from_pool_name(&vg.vg_name) else {
                debug!("Skipping volume group {} of unknown class", vg.vg_name);
                continue;
            };
            let total = parse_bytes(&vg.vg_size)?;
            let free = parse_bytes(&vg.vg_free)?;

            let mut disks = Vec::new();
            for pv in pvs.iter().filter(|pv| pv.vg_name == vg.vg_name) {
                disks.push(LocalDevice {
                    dev_path: pv.pv_name.clone(),
                    class,
                    capacity_bytes: parse_bytes(&pv.pv_size)?,
                    state: DeviceState::InUse,
                });
            }
            let volumes: Vec<String> = lvs
                .iter()
                .filter(|lv| lv.vg_name == vg.vg_name)
                .map(|lv| lv.lv_name.clone())
                .collect();
            let used_count = volumes.len() as i64;

            pools.insert(
                vg.vg_name.clone(),
                LocalPool {
                    name: vg.vg_name.clone(),
                    class,
                    pool_type: PoolType::Regular,
                    path: format!("/dev/{}", vg.vg_name),
                    total_capacity_bytes: total,
                    used_capacity_bytes: total - free,
                    free_capacity_bytes: free,
                    volume_capacity_bytes_limit: total,
                    total_volume_count: LVM_VOLUME_MAX_COUNT,
                    used_volume_count: used_count,
                    free_volume_count: LVM_VOLUME_MAX_COUNT - used_count,
                    disks,
                    volumes,
                    thin_pool: None,
                },
            );
        }
        Ok(pools)
    }

    async fn get_volumes(&self) -> Result<HashMap<String, HostVolume>> {
        let mut volumes = HashMap::new();
        for lv in self.lvs().await? {
            if !lv.vg_name.starts_with(POOL_NAME_PREFIX) {
                continue;
            }
            debug!("Detected LVM volume {}", lv.lv_name);
            volumes.insert(
                lv.lv_name.clone(),
                HostVolume {
                    capacity_bytes: parse_bytes(&lv.lv_size)?,
                    name: lv.lv_name,
                    pool_name: lv.vg_name,
                    path: lv.lv_path,
                },
            );
        }
        Ok(volumes)
    }

    async fn extend_pools(&self, disks: &[LocalDevice]) -> Result<bool> {
        let existing_pvs: HashSet<String> = self.pvs().await?.into_iter().map(|pv| pv.pv_name).collect();
        let existing_vgs: HashSet<String> = self.vgs().await?.into_iter().map(|vg| vg.vg_name).collect();

        let mut by_pool: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for disk in disks {
            if existing_pvs.contains(&disk.dev_path) {
                continue;
            }
            by_pool
                .entry(disk.class.pool_name())
                .or_default()
                .push(disk.dev_path.clone());
        }

        let mut extended = false;
        for (pool, pvs) in by_pool {
            self.extend_pool(pool, &pvs, existing_vgs.contains(pool)).await?;
            extended = true;
        }
        Ok(extended)
    }
}

#[async_trait]
impl VolumeExecutor for LvmExecutor {
    async fn create_volume_replica(&self, replica: &LocalVolumeReplica) -> Result<LocalVolumeReplicaStatus> {
        let size = round_to_extent(replica.spec.required_capacity_bytes);
        let args = vec![
            "--size".to_string(),
            format!("{}b", size),
            "--stripes".to_string(),
            "1".to_string(),
            replica.spec.pool_name.clone(),
            "-n".to_string(),
            replica.spec.volume_name.clone(),
            "-y".to_string(),
        ];

        let output = self.runner.run("lvcreate", &args).await?;
        if output.code != 0 && !output.stderr.contains("already exists") {
            return Err(AgentError::System(system::SystemError::CommandFailed {
                command: format!("lvcreate {}", args.join(" ")),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }));
        }

        let record = self.lv_record(&replica.spec.pool_name, &replica.spec.volume_name).await?;
        let lv = self.lvdisplay(&record.lv_path).await?;
        let mut status = replica.status.clone();
        status.allocated_capacity_bytes = parse_bytes(&record.lv_size)?;
        status.storage_path = record.lv_path.clone();
        status.device_path = record.lv_path;
        status.disks = lv.disks;
        Ok(status)
    }

    async fn expand_volume_replica(
        &self,
        replica: &LocalVolumeReplica,
        capacity_bytes: i64,
    ) -> Result<LocalVolumeReplicaStatus> {
        if replica.status.allocated_capacity_bytes == capacity_bytes {
            return Ok(replica.status.clone());
        }
        let size = round_to_extent(capacity_bytes);
        let args = vec![
            "--size".to_string(),
            format!("{}b", size),
            storage_path(replica).to_string(),
            "-y".to_string(),
        ];
        let output = self.runner.run("lvextend", &args).await?;
        if output.code != 0 && !output.stderr.contains("matches existing size") {
            return Err(AgentError::System(system::SystemError::CommandFailed {
                command: format!("lvextend {}", args.join(" ")),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }));
        }

        let record = self.lv_record(&replica.spec.pool_name, &replica.spec.volume_name).await?;
        let mut status = replica.status.clone();
        status.allocated_capacity_bytes = parse_bytes(&record.lv_size)?;
        Ok(status)
    }

    async fn delete_volume_replica(&self, replica: &LocalVolumeReplica) -> Result<()> {
        let path = storage_path(replica);
        if path.is_empty() {
            return Ok(());
        }
        let output = self
            .runner
            .run("lvremove", &[path.to_string(), "-y".to_string()])
            .await?;
        if output.code != 0 && !output.stderr.contains("Failed to find") {
            return Err(AgentError::System(system::SystemError::CommandFailed {
                command: format!("lvremove {} -y", path),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }));
        }
        Ok(())
    }

    async fn test_volume_replica(&self, replica: &LocalVolumeReplica) -> Result<LocalVolumeReplicaStatus> {
        let lv = self.lvdisplay(storage_path(replica)).await?;
        let mut status = replica.status.clone();
        status.synced = true;
        status.disks = lv.disks;
        status.state = lv.state;
        Ok(status)
    }
}
