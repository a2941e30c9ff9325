use apis::{NodeState, ReplicaState};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::manager::ControllerManager;
use crate::Result;

impl ControllerManager {
    /// Derives a storage node's state from its agent's heartbeat lease.
    pub(crate) async fn process_node(&self, name: &str) -> Result<()> {
        let Some(mut node) = self.nodes.get_opt(name).await? else {
            return Ok(());
        };
        let lease = self.leases.get_opt(name).await?;

        if lease.is_none() && self.cluster_nodes.get_opt(name).await?.is_none() {
            info!(node = %name, "Cluster node and heartbeat are gone, removing storage node");
            self.nodes.delete_opt(name).await?;
            return Ok(());
        }

        let alive = lease.map_or(false, |l| !l.is_expired(Utc::now()));
        let state = match (alive, node.status.state) {
            (false, _) => NodeState::Offline,
            (true, NodeState::Maintain) => NodeState::Maintain,
            (true, _) => NodeState::Ready,
        };
        if state == node.status.state {
            return Ok(());
        }

        info!(node = %name, from = %node.status.state, to = %state, "Storage node state changed");
        node.status.state = state;
        self.nodes.update_status(&node).await?;

        if state != NodeState::Ready {
            for vol in self.volumes.list().await? {
                if vol.status.published_node_name == name {
                    self.volume_queue.add(vol.metadata.name);
                }
            }
        }
        Ok(())
    }

    /// A cluster node that is not ready cannot serve its replicas.
    pub(crate) async fn process_cluster_node(&self, name: &str) -> Result<()> {
        let ready = match self.cluster_nodes.get_opt(name).await? {
            Some(node) => node.is_ready(),
            None => {
                debug!(node = %name, "Cluster node removed");
                self.node_queue.add(name.to_string());
                return Ok(());
            }
        };
        if ready {
            return Ok(());
        }

        for mut replica in self.replicas.list().await? {
            if replica.spec.node_name != name || replica.status.state != ReplicaState::Ready {
                continue;
            }
            warn!(node = %name, replica = %replica.metadata.name, "Cluster node not ready, demoting replica");
            replica.status.state = ReplicaState::NotReady;
            replica.status.message = format!("node {} is not ready", name);
            self.replicas.update_status(&replica).await?;
        }
        Ok(())
    }
}
