use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::metadata::ObjectKey;
use crate::store::{RawEvent, RecordStore};
use crate::versioning::{check_version, merge_patch, read_meta, replace_status, write_meta};
use crate::{Result, StoreError};

const WATCH_BUFFER: usize = 1024;

struct KindTable {
    records: BTreeMap<ObjectKey, Value>,
    events: broadcast::Sender<RawEvent>,
}

impl KindTable {
    fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            records: BTreeMap::new(),
            events,
        }
    }

    fn emit(&self, event: RawEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }
}

/// In-process record store used by standalone mode and the test suite.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, KindTable>>,
    revision: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stores `object` over an existing record, removing it instead when it is
    /// being deleted and its last finalizer is gone.
    fn commit(&self, table: &mut KindTable, key: ObjectKey, old: Value, mut new: Value) -> Result<Value> {
        let mut meta = read_meta(&new)?;
        meta.resource_version = self.next_revision();
        write_meta(&mut new, &meta)?;

        if meta.is_deleting() && meta.finalizers.is_empty() {
            table.records.remove(&key);
            table.emit(RawEvent::Deleted(new.clone()));
            return Ok(new);
        }

        table.records.insert(key, new.clone());
        table.emit(RawEvent::Updated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Value> {
        let tables = self.tables.read().await;
        tables
            .get(kind)
            .and_then(|t| t.records.get(key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, key))
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<Value>> {
        let tables = self.tables.read().await;
        let Some(table) = tables.get(kind) else {
            return Ok(Vec::new());
        };
        Ok(table
            .records
            .iter()
            .filter(|(key, _)| namespace.map_or(true, |ns| key.namespace == ns))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create(&self, kind: &str, mut object: Value) -> Result<Value> {
        let mut meta = read_meta(&object)?;
        let key = meta.key();

        let mut tables = self.tables.write().await;
        let table = tables.entry(kind.to_string()).or_insert_with(KindTable::new);
        if table.records.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                key: key.to_string(),
            });
        }

        meta.resource_version = self.next_revision();
        meta.uid = Uuid::new_v4().to_string();
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;
        write_meta(&mut object, &meta)?;

        table.records.insert(key, object.clone());
        table.emit(RawEvent::Added(object.clone()));
        Ok(object)
    }

    async fn update(&self, kind: &str, mut object: Value) -> Result<Value> {
        let mut meta = read_meta(&object)?;
        let key = meta.key();

        let mut tables = self.tables.write().await;
        let table = tables.get_mut(kind).ok_or_else(|| StoreError::not_found(kind, &key))?;
        let stored = table
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, &key))?;
        let stored_meta = read_meta(&stored)?;
        check_version(kind, &key, meta.resource_version, stored_meta.resource_version)?;

        // identity and deletion marks are owned by the store
        meta.uid = stored_meta.uid;
        meta.creation_timestamp = stored_meta.creation_timestamp;
        meta.deletion_timestamp = stored_meta.deletion_timestamp;
        write_meta(&mut object, &meta)?;
        replace_status(&mut object, stored.get("status"));

        self.commit(table, key, stored, object)
    }

    async fn update_status(&self, kind: &str, object: Value) -> Result<Value> {
        let meta = read_meta(&object)?;
        let key = meta.key();

        let mut tables = self.tables.write().await;
        let table = tables.get_mut(kind).ok_or_else(|| StoreError::not_found(kind, &key))?;
        let stored = table
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, &key))?;
        let stored_meta = read_meta(&stored)?;
        check_version(kind, &key, meta.resource_version, stored_meta.resource_version)?;

        let mut updated = stored.clone();
        replace_status(&mut updated, object.get("status"));
        self.commit(table, key, stored, updated)
    }

    async fn patch(&self, kind: &str, key: &ObjectKey, patch: Value) -> Result<Value> {
        let mut tables = self.tables.write().await;
        let table = tables.get_mut(kind).ok_or_else(|| StoreError::not_found(kind, key))?;
        let stored = table
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, key))?;
        let stored_meta = read_meta(&stored)?;

        let mut patched = stored.clone();
        merge_patch(&mut patched, &patch);

        let mut meta = read_meta(&patched)?;
        meta.name = stored_meta.name;
        meta.namespace = stored_meta.namespace;
        meta.uid = stored_meta.uid;
        meta.creation_timestamp = stored_meta.creation_timestamp;
        meta.deletion_timestamp = stored_meta.deletion_timestamp;
        write_meta(&mut patched, &meta)?;

        self.commit(table, key.clone(), stored, patched)
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<()> {
        let mut tables = self.tables.write().await;
        let table = tables.get_mut(kind).ok_or_else(|| StoreError::not_found(kind, key))?;
        let stored = table
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, key))?;
        let mut meta = read_meta(&stored)?;

        if meta.finalizers.is_empty() {
            table.records.remove(key);
            table.emit(RawEvent::Deleted(stored));
            return Ok(());
        }

        if meta.is_deleting() {
            return Ok(());
        }

        meta.deletion_timestamp = Some(Utc::now());
        let mut marked = stored.clone();
        write_meta(&mut marked, &meta)?;
        self.commit(table, key.clone(), stored, marked)?;
        Ok(())
    }

    async fn watch(&self, kind: &str) -> Result<broadcast::Receiver<RawEvent>> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(kind.to_string()).or_insert_with(KindTable::new);
        Ok(table.events.subscribe())
    }
}
