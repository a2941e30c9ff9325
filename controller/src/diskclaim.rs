use apis::{DiskClaimState, DiskClaimStatus, LocalDisk, LocalDiskClaim, LocalDiskState};
use tracing::{debug, info};

use crate::manager::ControllerManager;
use crate::{ControllerError, Result};

impl ControllerManager {
    /// Binds disk claims to free disks on their node. Consuming the disks is
    /// left to the node agent.
    pub(crate) async fn process_disk_claim(&self, name: &str) -> Result<()> {
        let Some(claim) = self.disk_claims.get_opt(name).await? else {
            return Ok(());
        };
        debug!(claim = %name, status = %claim.status.status, "Processing disk claim");

        match claim.status.status {
            DiskClaimStatus::Empty => self.set_claim_status(claim, DiskClaimStatus::Pending).await,
            DiskClaimStatus::Pending | DiskClaimStatus::Extending => self.bind_disks(claim).await,
            DiskClaimStatus::ToBeDeleted => self.set_claim_status(claim, DiskClaimStatus::Deleted).await,
            DiskClaimStatus::Deleted => {
                info!(claim = %name, "Removing deleted disk claim");
                self.disk_claims.delete_opt(name).await?;
                Ok(())
            }
            DiskClaimStatus::Bound | DiskClaimStatus::Consumed => Ok(()),
        }
    }

    async fn set_claim_status(&self, mut claim: LocalDiskClaim, status: DiskClaimStatus) -> Result<()> {
        info!(claim = %claim.metadata.name, from = %claim.status.status, to = %status, "Disk claim status changed");
        claim.status.status = status;
        self.disk_claims.update_status(&claim).await?;
        Ok(())
    }

    async fn bind_disks(&self, claim: LocalDiskClaim) -> Result<()> {
        let name = claim.metadata.name.clone();
        let chosen: Vec<LocalDisk> = self
            .disks
            .list()
            .await?
            .into_iter()
            .filter(|d| d.spec.claim_ref.as_deref() == Some(name.as_str()) || matches_claim(d, &claim))
            .collect();
        if chosen.is_empty() {
            return Err(ControllerError::NoAvailableDisk(name));
        }

        let mut refs = Vec::with_capacity(chosen.len());
        for disk in chosen {
            let disk_name = disk.metadata.name.clone();
            let disk = if disk.spec.claim_ref.as_deref() != Some(name.as_str()) {
                let mut disk = disk;
                disk.spec.claim_ref = Some(name.clone());
                self.disks.update(&disk).await?
            } else {
                disk
            };
            if disk.status.claim_state != DiskClaimState::Claimed {
                let mut disk = disk;
                disk.status.claim_state = DiskClaimState::Claimed;
                self.disks.update_status(&disk).await?;
            }
            info!(claim = %name, disk = %disk_name, "Disk claimed");
            refs.push(disk_name);
        }
        refs.sort();

        let mut claim = claim;
        if claim.spec.disk_refs != refs {
            claim.spec.disk_refs = refs;
            claim = self.disk_claims.update(&claim).await?;
        }
        self.set_claim_status(claim, DiskClaimStatus::Bound).await
    }
}

fn matches_claim(disk: &LocalDisk, claim: &LocalDiskClaim) -> bool {
    let want = &claim.spec.description;
    disk.spec.node_name == claim.spec.node_name
        && disk.spec.state == LocalDiskState::Active
        && disk.is_allocatable()
        && disk.spec.claim_ref.is_none()
        && disk.spec.disk_attributes.disk_type == want.disk_type
        && disk.spec.capacity >= want.capacity
        && (want.device_paths.is_empty() || want.device_paths.contains(&disk.spec.dev_path))
}
