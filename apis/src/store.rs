use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::metadata::ObjectKey;
use crate::Result;

/// Untyped change notification for one record kind.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Added(Value),
    Updated { old: Value, new: Value },
    Deleted(Value),
}

/// The cluster record store: typed records are exchanged as JSON documents
/// holding `metadata`, `spec` and `status` members.
///
/// Writers go through resource-version compare-and-swap: `update` and
/// `update_status` fail with `Conflict` unless the caller saw the latest copy.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Value>;

    /// Lists records of `kind`, restricted to one namespace when given.
    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<Value>>;

    async fn create(&self, kind: &str, object: Value) -> Result<Value>;

    /// Replaces metadata and spec, keeping the stored status.
    async fn update(&self, kind: &str, object: Value) -> Result<Value>;

    /// Replaces the status subresource only.
    async fn update_status(&self, kind: &str, object: Value) -> Result<Value>;

    /// JSON merge patch, applied without a version check.
    async fn patch(&self, kind: &str, key: &ObjectKey, patch: Value) -> Result<Value>;

    /// Removes the record, or only marks it deleting while finalizers remain.
    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<()>;

    async fn watch(&self, kind: &str) -> Result<broadcast::Receiver<RawEvent>>;
}
