use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::QueueConfig;

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

/// Deduplicating work queue with per-item exponential back-off.
///
/// An item is held at most once in the queue. Adding an item that is being
/// processed marks it dirty, and `done` puts it back so the latest change is
/// always handled after the current pass finishes.
pub struct TaskQueue<K> {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> TaskQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(name: &str, config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            config,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, item: K) {
        {
            let mut state = self.lock();
            if state.shutting_down || !state.dirty.insert(item.clone()) {
                return;
            }
            if state.processing.contains(&item) {
                return;
            }
            state.queue.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Schedules `item` after its back-off delay. Items past `max_retries` are dropped.
    pub fn add_rate_limited(self: &Arc<Self>, item: K) {
        let attempt = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(item.clone()).or_insert(0);
            *failures += 1;
            *failures
        };

        if self.config.max_retries > 0 && attempt > self.config.max_retries {
            warn!(queue = %self.name, "Dropping {:?} after {} retries", item, attempt - 1);
            self.forget(&item);
            return;
        }

        let delay = self.config.backoff(attempt - 1);
        debug!(queue = %self.name, "Requeue {:?} in {:?}", item, delay);
        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.add(item);
            }
        });
    }

    /// Waits for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn done(&self, item: &K) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(item);
            if state.dirty.contains(item) && !state.shutting_down {
                state.queue.push_back(item.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Clears the failure history of `item`.
    pub fn forget(&self, item: &K) {
        self.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &K) -> u32 {
        self.lock().failures.get(item).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}
