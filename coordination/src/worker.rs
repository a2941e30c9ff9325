use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, error};

use crate::TaskQueue;

/// Drains `queue` until it shuts down. Failed items go back with back-off;
/// successful ones have their failure history cleared.
pub async fn run_worker<K, F, Fut, E>(queue: Arc<TaskQueue<K>>, mut process: F)
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    F: FnMut(K) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    debug!(queue = %queue.name(), "Worker started");
    while let Some(task) = queue.get().await {
        match process(task.clone()).await {
            Ok(()) => {
                debug!(queue = %queue.name(), task = ?task, "Completed a task");
                queue.forget(&task);
            }
            Err(e) => {
                error!(queue = %queue.name(), task = ?task, error = %e, "Failed to process task, retry later");
                queue.add_rate_limited(task.clone());
            }
        }
        queue.done(&task);
    }
    debug!(queue = %queue.name(), "Worker stopped");
}
