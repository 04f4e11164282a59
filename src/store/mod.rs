//! The watchable object store the controllers consume.
//!
//! [`ResourceStore`] is the dynamic, object-safe seam (JSON objects keyed by
//! kind and namespaced name). [`Api`] layers typed access on top of it the way
//! a cluster client does. [`MemoryStore`] is the in-process implementation
//! used by tests and the local daemon.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::resources::{Object, ObjectKey};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;

/// How dependents are treated when their owner is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    /// Dependents are removed along with the owner.
    #[default]
    Background,
    /// Dependents stay and lose their reference to the owner.
    Orphan,
}

/// Result of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The object (and, unless orphaned, its dependents) is gone.
    Removed,
    /// Finalizers remain; the object is marked for deletion.
    Finalizing,
    /// Nothing to delete.
    Missing,
}

/// Equality-based label selector. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().and(key, value)
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.and_then(|labels| labels.get(key)) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Applied,
    Deleted,
}

/// Change notification for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub key: ObjectKey,
    pub kind: WatchEventKind,
    pub owners: Vec<OwnerReference>,
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, StoreError>;

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, StoreError>;

    async fn create(&self, kind: &str, object: Value) -> Result<Value, StoreError>;

    /// Writes metadata and spec. Status in `object` is ignored.
    async fn replace(&self, kind: &str, object: Value) -> Result<Value, StoreError>;

    /// Writes the status subresource only.
    async fn replace_status(&self, kind: &str, object: Value) -> Result<Value, StoreError>;

    async fn delete(
        &self,
        key: &ObjectKey,
        propagation: Propagation,
    ) -> Result<DeleteOutcome, StoreError>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Read access to the tail of a container's log.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn tail(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        lines: usize,
    ) -> Result<String, StoreError>;
}

/// Typed, namespaced view over a [`ResourceStore`].
pub struct Api<K> {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Api<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Object> Api<K> {
    pub fn namespaced(store: Arc<dyn ResourceStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            _kind: PhantomData,
        }
    }

    fn key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(K::KIND, &self.namespace, name)
    }

    /// `object` bound to this view's namespace. An object that names a
    /// different namespace is refused rather than written elsewhere.
    fn scoped(&self, object: &K) -> Result<K, StoreError> {
        let mut object = object.clone();
        let namespace = object.metadata().namespace.clone().unwrap_or_default();
        if namespace.is_empty() {
            object.metadata_mut().namespace = Some(self.namespace.clone());
        } else if namespace != self.namespace {
            return Err(StoreError::NamespaceMismatch {
                kind: K::KIND.to_string(),
                name: object.name().to_string(),
                namespace,
                expected: self.namespace.clone(),
            });
        }
        Ok(object)
    }

    pub async fn get_opt(&self, name: &str) -> Result<Option<K>, StoreError> {
        match self.store.get(&self.key(name)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, name: &str) -> Result<K, StoreError> {
        self.get_opt(name).await?.ok_or_else(|| {
            let key = self.key(name);
            StoreError::NotFound {
                kind: key.kind,
                namespace: key.namespace,
                name: key.name,
            }
        })
    }

    pub async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>, StoreError> {
        self.store
            .list(K::KIND, Some(&self.namespace), selector)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }

    pub async fn create(&self, object: &K) -> Result<K, StoreError> {
        let object = self.scoped(object)?;
        let created = self
            .store
            .create(K::KIND, serde_json::to_value(&object)?)
            .await?;
        Ok(serde_json::from_value(created)?)
    }

    pub async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let object = self.scoped(object)?;
        let updated = self
            .store
            .replace(K::KIND, serde_json::to_value(&object)?)
            .await?;
        Ok(serde_json::from_value(updated)?)
    }

    pub async fn replace_status(&self, object: &K) -> Result<K, StoreError> {
        let object = self.scoped(object)?;
        let updated = self
            .store
            .replace_status(K::KIND, serde_json::to_value(&object)?)
            .await?;
        Ok(serde_json::from_value(updated)?)
    }

    pub async fn delete(
        &self,
        name: &str,
        propagation: Propagation,
    ) -> Result<DeleteOutcome, StoreError> {
        self.store.delete(&self.key(name), propagation).await
    }
}
