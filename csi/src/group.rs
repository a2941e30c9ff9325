use apis::{
    AccessibilityTopology, Api, LocalVolume, LocalVolumeGroup, LocalVolumeGroupSpec,
    LocalVolumeSpec, ObjectMeta, PersistentVolumeClaim, Pod, VolumeInfo,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::params::VolumeParameters;
use crate::plugin::Plugin;
use crate::{CsiError, CsiResult};

impl Plugin {
    /// Finds the group a claim's volume belongs to, joining or creating one
    /// as needed. All volumes of one pod share a group and so its nodes.
    pub(crate) async fn resolve_group(
        &self,
        namespace: &str,
        claim: &str,
        params: &VolumeParameters,
        required_bytes: i64,
        requisite_node: Option<&str>,
    ) -> CsiResult<LocalVolumeGroup> {
        if let Some(group) = self.group_manager.group_by_claim(namespace, claim).await? {
            debug!(group = %group.metadata.name, claim = %claim, "Claim already grouped");
            return Ok(group);
        }

        let node = requisite_node.ok_or_else(|| {
            CsiError::InvalidArgument(format!("claim {}/{} has no requisite topology", namespace, claim))
        })?;

        let pod = self.pod_of_claim(namespace, claim).await?;
        let siblings: Vec<String> = pod
            .as_ref()
            .map(|p| p.claim_names().into_iter().filter(|c| c != claim).collect())
            .unwrap_or_default();

        for sibling in &siblings {
            if let Some(mut group) = self.group_manager.group_by_claim(namespace, sibling).await? {
                info!(group = %group.metadata.name, claim = %claim, sibling = %sibling, "Joining sibling's volume group");
                group.spec.volumes.push(VolumeInfo {
                    pvc_name: claim.to_string(),
                    local_volume_name: String::new(),
                });
                return Ok(self.groups.update(&group).await?);
            }
        }

        let claims: Api<PersistentVolumeClaim> = Api::namespaced(self.store.clone(), namespace);
        let mut members = vec![VolumeInfo {
            pvc_name: claim.to_string(),
            local_volume_name: String::new(),
        }];
        let mut total_bytes = required_bytes;
        for sibling in &siblings {
            let Some(pvc) = claims.get_opt(sibling).await? else {
                continue;
            };
            if !self.group_manager.is_driver_claim(&pvc).await? {
                continue;
            }
            total_bytes += pvc.spec.requested_bytes;
            members.push(VolumeInfo {
                pvc_name: sibling.clone(),
                local_volume_name: String::new(),
            });
        }

        let nodes = self.select_group_nodes(params, total_bytes, node)?;
        let group = LocalVolumeGroup {
            metadata: ObjectMeta::named(Uuid::new_v4().to_string()),
            spec: LocalVolumeGroupSpec {
                namespace: namespace.to_string(),
                accessibility: AccessibilityTopology {
                    nodes,
                    ..Default::default()
                },
                volumes: members,
                pods: pod.map(|p| vec![p.metadata.name]).unwrap_or_default(),
            },
        };
        info!(
            group = %group.metadata.name,
            claim = %claim,
            nodes = ?group.spec.accessibility.nodes,
            "Creating volume group"
        );
        Ok(self.groups.create(&group).await?)
    }

    async fn pod_of_claim(&self, namespace: &str, claim: &str) -> CsiResult<Option<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.store.clone(), namespace);
        Ok(pods
            .list()
            .await?
            .into_iter()
            .find(|p| p.claim_names().iter().any(|c| c == claim)))
    }

    /// The requisite node first, then the best-scored nodes that can hold
    /// every member of the group.
    fn select_group_nodes(
        &self,
        params: &VolumeParameters,
        total_bytes: i64,
        requisite_node: &str,
    ) -> CsiResult<Vec<String>> {
        let sizing = LocalVolume {
            metadata: ObjectMeta::named(format!("group-sizing-{}", requisite_node)),
            spec: LocalVolumeSpec {
                pool_name: params.pool_name().to_string(),
                required_capacity_bytes: total_bytes,
                replica_number: params.replica_number,
                convertible: params.convertible,
                volume_kind: params.volume_kind,
                accessibility: AccessibilityTopology {
                    nodes: vec![requisite_node.to_string()],
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };

        let candidates = self.scheduler.get_node_candidates(&sizing)?;
        if candidates.first().map(|n| n.metadata.name.as_str()) != Some(requisite_node) {
            return Err(CsiError::Unavailable(format!(
                "node {} cannot host the volume group",
                requisite_node
            )));
        }

        let wanted = params.replica_number.max(1) as usize;
        if candidates.len() < wanted {
            return Err(CsiError::Unavailable(format!(
                "need {} nodes for the volume group, found {}",
                wanted,
                candidates.len()
            )));
        }
        Ok(candidates.into_iter().take(wanted).map(|n| n.metadata.name).collect())
    }
}
