use apis::{LocalVolumeGroup, ObjectKey};
use std::collections::HashMap;

/// Reverse lookups from group members to the group name.
#[derive(Debug, Default, Clone)]
pub struct GroupIndex {
    pub volumes: HashMap<String, String>,
    pub claims: HashMap<ObjectKey, String>,
    pub pods: HashMap<ObjectKey, String>,
}

impl GroupIndex {
    /// Records every member the group lists.
    pub fn insert_group(&mut self, group: &LocalVolumeGroup) {
        let name = &group.metadata.name;
        let namespace = &group.spec.namespace;
        for member in &group.spec.volumes {
            if !member.pvc_name.is_empty() {
                self.claims
                    .insert(ObjectKey::new(namespace.as_str(), member.pvc_name.as_str()), name.clone());
            }
            if !member.local_volume_name.is_empty() {
                self.volumes.insert(member.local_volume_name.clone(), name.clone());
            }
        }
        for pod in &group.spec.pods {
            self.pods
                .insert(ObjectKey::new(namespace.as_str(), pod.as_str()), name.clone());
        }
    }

    pub fn remove_group(&mut self, name: &str) {
        self.volumes.retain(|_, group| group != name);
        self.claims.retain(|_, group| group != name);
        self.pods.retain(|_, group| group != name);
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty() && self.claims.is_empty() && self.pods.is_empty()
    }
}
