use serde_json::{Map, Value};

use crate::metadata::{ObjectKey, ObjectMeta};
use crate::{Result, StoreError};

/// Applies a JSON merge patch (RFC 7386) in place. `null` members remove keys.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

pub(crate) fn read_meta(object: &Value) -> Result<ObjectMeta> {
    let meta = object
        .get("metadata")
        .ok_or_else(|| StoreError::Invalid("object has no metadata".to_string()))?;
    let meta: ObjectMeta = serde_json::from_value(meta.clone())?;
    if meta.name.is_empty() {
        return Err(StoreError::Invalid("object name must not be empty".to_string()));
    }
    Ok(meta)
}

pub(crate) fn write_meta(object: &mut Value, meta: &ObjectMeta) -> Result<()> {
    let encoded = serde_json::to_value(meta)?;
    match object {
        Value::Object(map) => {
            map.insert("metadata".to_string(), encoded);
            Ok(())
        }
        _ => Err(StoreError::Invalid("object must be a JSON map".to_string())),
    }
}

/// Optimistic concurrency check: writers must hold the stored version.
pub(crate) fn check_version(kind: &str, key: &ObjectKey, given: u64, current: u64) -> Result<()> {
    if given != current {
        return Err(StoreError::Conflict {
            kind: kind.to_string(),
            key: key.to_string(),
            given,
            current,
        });
    }
    Ok(())
}

pub(crate) fn replace_status(object: &mut Value, status: Option<&Value>) {
    if let Value::Object(map) = object {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status.clone());
            }
            None => {
                map.remove("status");
            }
        }
    }
}
