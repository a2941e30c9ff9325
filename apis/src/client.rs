use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::metadata::ObjectKey;
use crate::object::Resource;
use crate::store::RecordStore;
use crate::Result;

/// Typed access to one record kind, optionally scoped to a namespace.
pub struct Api<T> {
    store: Arc<dyn RecordStore>,
    namespace: Option<String>,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for Api<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T: Resource> Api<T> {
    pub fn all(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            namespace: None,
            _kind: PhantomData,
        }
    }

    pub fn namespaced(store: Arc<dyn RecordStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: Some(namespace.to_string()),
            _kind: PhantomData,
        }
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    fn key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(self.namespace.clone().unwrap_or_default(), name)
    }

    fn encode(&self, object: &T) -> Result<Value> {
        let mut object = object.clone();
        if let Some(ns) = &self.namespace {
            if object.meta().namespace.is_empty() {
                object.meta_mut().namespace = ns.clone();
            }
        }
        Ok(serde_json::to_value(object)?)
    }

    fn decode(value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get(&self, name: &str) -> Result<T> {
        let value = self.store.get(T::KIND, &self.key(name)).await?;
        Self::decode(value)
    }

    pub async fn get_opt(&self, name: &str) -> Result<Option<T>> {
        match self.get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self) -> Result<Vec<T>> {
        self.store
            .list(T::KIND, self.namespace.as_deref())
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    pub async fn create(&self, object: &T) -> Result<T> {
        let value = self.store.create(T::KIND, self.encode(object)?).await?;
        Self::decode(value)
    }

    pub async fn update(&self, object: &T) -> Result<T> {
        let value = self.store.update(T::KIND, self.encode(object)?).await?;
        Self::decode(value)
    }

    pub async fn update_status(&self, object: &T) -> Result<T> {
        let value = self.store.update_status(T::KIND, self.encode(object)?).await?;
        Self::decode(value)
    }

    pub async fn patch(&self, name: &str, patch: &Value) -> Result<T> {
        let value = self.store.patch(T::KIND, &self.key(name), patch.clone()).await?;
        Self::decode(value)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(T::KIND, &self.key(name)).await
    }

    /// Deletes and treats an already missing record as success.
    pub async fn delete_opt(&self, name: &str) -> Result<()> {
        match self.delete(name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}
