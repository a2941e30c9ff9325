use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::metadata::ObjectKey;
use crate::object::Resource;
use crate::store::{RawEvent, RecordStore};
use crate::Result;

#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Updated { old: T, new: T },
    Deleted(T),
}

impl<T> WatchEvent<T> {
    /// The most recent copy carried by the event.
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => obj,
            WatchEvent::Updated { new, .. } => new,
        }
    }
}

pub type EventHandler<T> = Box<dyn Fn(&WatchEvent<T>) + Send + Sync>;

/// Watches one record kind, keeps a local cache and fans events out to the
/// registered handlers. Handlers run inline and must not block.
pub struct Informer<T: Resource> {
    store: Arc<dyn RecordStore>,
    cache: RwLock<BTreeMap<ObjectKey, T>>,
    handlers: std::sync::RwLock<Vec<EventHandler<T>>>,
    synced: AtomicBool,
    synced_notify: Notify,
}

impl<T: Resource> Informer<T> {
    pub fn new(store: Arc<dyn RecordStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            cache: RwLock::new(BTreeMap::new()),
            handlers: std::sync::RwLock::new(Vec::new()),
            synced: AtomicBool::new(false),
            synced_notify: Notify::new(),
        })
    }

    pub fn add_handler(&self, handler: EventHandler<T>) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(poisoned) => poisoned.into_inner().push(handler),
        }
    }

    pub async fn get(&self, name: &str) -> Option<T> {
        self.get_key(&ObjectKey::cluster(name)).await
    }

    pub async fn get_key(&self, key: &ObjectKey) -> Option<T> {
        self.cache.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<T> {
        self.cache.read().await.values().cloned().collect()
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub async fn wait_for_sync(&self) {
        loop {
            let notified = self.synced_notify.notified();
            if self.has_synced() {
                return;
            }
            notified.await;
        }
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let informer = self.clone();
        tokio::spawn(async move { informer.run().await })
    }

    /// Subscribes before listing so nothing written in between is lost. Falls
    /// back to a relist whenever the watch buffer overflows.
    pub async fn run(&self) -> Result<()> {
        loop {
            let mut events = self.store.watch(T::KIND).await?;
            self.relist().await?;

            if !self.synced.swap(true, Ordering::SeqCst) {
                self.synced_notify.notify_waiters();
            }

            loop {
                match events.recv().await {
                    Ok(event) => self.apply(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("{} watch fell behind by {} events, relisting", T::KIND, skipped);
                        break;
                    }
                    Err(RecvError::Closed) => return Ok(()),
                }
            }
        }
    }

    async fn relist(&self) -> Result<()> {
        let listed: BTreeMap<ObjectKey, T> = self
            .store
            .list(T::KIND, None)
            .await?
            .into_iter()
            .filter_map(|v| decode::<T>(v))
            .map(|obj| (obj.key(), obj))
            .collect();

        let mut dispatched = Vec::new();
        {
            let mut cache = self.cache.write().await;
            let stale: Vec<ObjectKey> = cache
                .keys()
                .filter(|key| !listed.contains_key(*key))
                .cloned()
                .collect();
            for key in stale {
                if let Some(old) = cache.remove(&key) {
                    dispatched.push(WatchEvent::Deleted(old));
                }
            }
            for (key, obj) in listed {
                match cache.insert(key, obj.clone()) {
                    Some(old) if old.resource_version() == obj.resource_version() => {}
                    Some(old) => dispatched.push(WatchEvent::Updated { old, new: obj }),
                    None => dispatched.push(WatchEvent::Added(obj)),
                }
            }
        }

        debug!("{} informer relisted, {} changes", T::KIND, dispatched.len());
        for event in &dispatched {
            self.dispatch(event);
        }
        Ok(())
    }

    async fn apply(&self, event: RawEvent) {
        let dispatched = {
            let mut cache = self.cache.write().await;
            match event {
                RawEvent::Added(value) | RawEvent::Updated { new: value, .. } => {
                    let Some(obj) = decode::<T>(value) else {
                        return;
                    };
                    let key = obj.key();
                    match cache.get(&key) {
                        Some(cached) if cached.resource_version() >= obj.resource_version() => return,
                        Some(cached) => {
                            let old = cached.clone();
                            cache.insert(key, obj.clone());
                            WatchEvent::Updated { old, new: obj }
                        }
                        None => {
                            cache.insert(key, obj.clone());
                            WatchEvent::Added(obj)
                        }
                    }
                }
                RawEvent::Deleted(value) => {
                    let Some(obj) = decode::<T>(value) else {
                        return;
                    };
                    if cache.remove(&obj.key()).is_none() {
                        return;
                    }
                    WatchEvent::Deleted(obj)
                }
            }
        };
        self.dispatch(&dispatched);
    }

    fn dispatch(&self, event: &WatchEvent<T>) {
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handler in handlers.iter() {
            handler(event);
        }
    }
}

fn decode<T: Resource>(value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(obj) => Some(obj),
        Err(e) => {
            warn!("Dropping undecodable {} record: {}", T::KIND, e);
            None
        }
    }
}
