use apis::OperationState;
use tracing::warn;

use crate::manager::ControllerManager;
use crate::Result;

impl ControllerManager {
    /// Restoring from a snapshot is not supported; requests fail fast.
    pub(crate) async fn process_restore(&self, name: &str) -> Result<()> {
        let Some(mut restore) = self.restores.get_opt(name).await? else {
            return Ok(());
        };
        if restore.status.state.is_terminal() {
            return Ok(());
        }
        warn!(restore = %name, snapshot = %restore.spec.source_volume_snapshot, "Snapshot restore is not implemented");
        restore.status.state = if restore.spec.abort {
            OperationState::Aborted
        } else {
            OperationState::Failed
        };
        restore.status.message = "snapshot restore is not implemented".to_string();
        self.restores.update_status(&restore).await?;
        Ok(())
    }
}
