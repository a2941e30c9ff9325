use apis::{Api, Resource};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

use crate::Result;

/// Last known copies of records that were deleted before reaching a
/// terminal state.
pub(crate) struct Tombstones<T> {
    records: Mutex<HashMap<String, T>>,
}

impl<T: Resource> Tombstones<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: T) {
        let name = record.name().to_string();
        match self.records.lock() {
            Ok(mut r) => r.insert(name, record),
            Err(poisoned) => poisoned.into_inner().insert(name, record),
        };
    }

    pub fn take(&self, name: &str) -> Option<T> {
        match self.records.lock() {
            Ok(mut r) => r.remove(name),
            Err(poisoned) => poisoned.into_inner().remove(name),
        }
    }
}

/// Puts a lost record back with its spec and status.
pub(crate) async fn recreate<T: Resource>(api: &Api<T>, mut lost: T) -> Result<()> {
    warn!(kind = T::KIND, name = %lost.name(), "Record deleted unexpectedly, recreating");
    let meta = lost.meta_mut();
    meta.resource_version = 0;
    meta.uid.clear();
    meta.deletion_timestamp = None;
    meta.creation_timestamp = None;
    match api.create(&lost).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
