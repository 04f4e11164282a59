use super::{
    DeleteOutcome, LabelSelector, LogSource, Propagation, ResourceStore, WatchEvent,
    WatchEventKind,
};
use crate::error::StoreError;
use crate::resources::{ObjectKey, ObjectMetaExt};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

const WATCH_CAPACITY: usize = 1024;

/// In-process object store with optimistic concurrency, owner-reference
/// cascade deletion, finalizer-gated deletion and a broadcast watch.
pub struct MemoryStore {
    table: Mutex<Table>,
    logs: Mutex<HashMap<(String, String, String), String>>,
    events: broadcast::Sender<WatchEvent>,
}

#[derive(Default)]
struct Table {
    objects: BTreeMap<ObjectKey, Value>,
    version: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            table: Mutex::new(Table::default()),
            logs: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Stores the full log text of one container, replacing earlier output.
    pub async fn put_logs(&self, namespace: &str, pod: &str, container: &str, text: &str) {
        self.logs.lock().await.insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            text.to_string(),
        );
    }

    fn publish(&self, events: Vec<WatchEvent>) {
        for event in events {
            // No receivers is fine: nobody is watching yet.
            let _ = self.events.send(event);
        }
    }
}

impl Table {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Removes `key` and walks its dependents according to `propagation`.
    fn remove_cascading(
        &mut self,
        key: &ObjectKey,
        propagation: Propagation,
        events: &mut Vec<WatchEvent>,
    ) {
        let mut pending = vec![key.clone()];
        while let Some(current) = pending.pop() {
            let Some(removed) = self.objects.remove(&current) else {
                continue;
            };
            let meta = meta_of(&removed);
            events.push(WatchEvent {
                key: current.clone(),
                kind: WatchEventKind::Deleted,
                owners: meta.owners().to_vec(),
            });
            let Some(uid) = meta.uid.filter(|uid| !uid.is_empty()) else {
                continue;
            };

            let dependents: Vec<ObjectKey> = self
                .objects
                .iter()
                .filter(|(dep_key, value)| {
                    dep_key.namespace == current.namespace
                        && meta_of(value).owners().iter().any(|owner| owner.uid == uid)
                })
                .map(|(dep_key, _)| dep_key.clone())
                .collect();

            for dep_key in dependents {
                if propagation == Propagation::Orphan {
                    self.strip_owner(&dep_key, &uid, events);
                    continue;
                }
                let finalizing = self
                    .objects
                    .get(&dep_key)
                    .is_some_and(|value| has_finalizers(&meta_of(value)));
                if finalizing {
                    self.mark_deleting(&dep_key, events);
                } else {
                    pending.push(dep_key);
                }
            }
        }
    }

    fn strip_owner(&mut self, key: &ObjectKey, uid: &str, events: &mut Vec<WatchEvent>) {
        let version = self.next_version();
        if let Some(value) = self.objects.get_mut(key) {
            let mut meta = meta_of(value);
            if let Some(owners) = meta.owner_references.as_mut() {
                owners.retain(|owner| owner.uid != uid);
            }
            meta.resource_version = Some(version);
            set_meta(value, &meta);
            events.push(WatchEvent {
                key: key.clone(),
                kind: WatchEventKind::Applied,
                owners: meta.owners().to_vec(),
            });
        }
    }

    fn mark_deleting(&mut self, key: &ObjectKey, events: &mut Vec<WatchEvent>) {
        let version = self.next_version();
        if let Some(value) = self.objects.get_mut(key) {
            let mut meta = meta_of(value);
            if meta.deletion_timestamp.is_some() {
                return;
            }
            meta.deletion_timestamp = Some(Time(Utc::now()));
            meta.resource_version = Some(version);
            set_meta(value, &meta);
            events.push(WatchEvent {
                key: key.clone(),
                kind: WatchEventKind::Applied,
                owners: meta.owners().to_vec(),
            });
        }
    }
}

fn meta_of(value: &Value) -> ObjectMeta {
    value
        .get("metadata")
        .cloned()
        .and_then(|meta| serde_json::from_value(meta).ok())
        .unwrap_or_default()
}

fn has_finalizers(meta: &ObjectMeta) -> bool {
    meta.finalizers.as_ref().is_some_and(|all| !all.is_empty())
}

fn set_meta(value: &mut Value, meta: &ObjectMeta) {
    if let (Some(object), Ok(meta)) = (value.as_object_mut(), serde_json::to_value(meta)) {
        object.insert("metadata".into(), meta);
    }
}

fn key_for(kind: &str, value: &Value) -> Result<(ObjectKey, ObjectMeta), StoreError> {
    let meta: ObjectMeta = serde_json::from_value(
        value
            .get("metadata")
            .cloned()
            .ok_or_else(|| StoreError::Backend(format!("{kind}: object has no metadata")))?,
    )?;
    let name = meta.name.as_deref().unwrap_or_default();
    if name.trim().is_empty() {
        return Err(StoreError::Backend(format!("{kind}: metadata.name is required")));
    }
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    Ok((ObjectKey::new(kind, namespace, name), meta))
}

fn not_found(key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind: key.kind.clone(),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
    }
}

fn check_version(
    key: &ObjectKey,
    incoming: &ObjectMeta,
    current: &ObjectMeta,
) -> Result<(), StoreError> {
    match (&incoming.resource_version, &current.resource_version) {
        (Some(theirs), Some(ours)) if theirs != ours => Err(StoreError::Conflict {
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, StoreError> {
        Ok(self.table.lock().await.objects.get(key).cloned())
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && namespace.is_none_or(|ns| key.namespace == ns))
            .filter(|(_, value)| selector.matches(meta_of(value).labels.as_ref()))
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn create(&self, kind: &str, mut object: Value) -> Result<Value, StoreError> {
        let (key, mut meta) = key_for(kind, &object)?;
        let mut table = self.table.lock().await;
        if table.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.kind,
                namespace: key.namespace,
                name: key.name,
            });
        }

        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(table.next_version());
        meta.generation = Some(1);
        meta.creation_timestamp
            .get_or_insert_with(|| Time(Utc::now()));
        meta.deletion_timestamp = None;
        set_meta(&mut object, &meta);

        table.objects.insert(key.clone(), object.clone());
        drop(table);

        self.publish(vec![WatchEvent {
            key,
            kind: WatchEventKind::Applied,
            owners: meta.owners().to_vec(),
        }]);
        Ok(object)
    }

    async fn replace(&self, kind: &str, mut object: Value) -> Result<Value, StoreError> {
        let (key, mut meta) = key_for(kind, &object)?;
        let mut table = self.table.lock().await;
        let current = table.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        let current_meta = meta_of(&current);
        check_version(&key, &meta, &current_meta)?;

        let spec_changed = object.get("spec") != current.get("spec");
        meta.uid = current_meta.uid;
        meta.creation_timestamp = current_meta.creation_timestamp;
        meta.deletion_timestamp = current_meta.deletion_timestamp;
        meta.generation = Some(current_meta.generation.unwrap_or(1) + i64::from(spec_changed));
        meta.resource_version = Some(table.next_version());
        set_meta(&mut object, &meta);

        if let Some(fields) = object.as_object_mut() {
            match current.get("status") {
                Some(status) => {
                    fields.insert("status".into(), status.clone());
                }
                None => {
                    fields.remove("status");
                }
            }
        }

        let mut events = Vec::new();
        if meta.is_deleting() && !has_finalizers(&meta) {
            table.objects.insert(key.clone(), object.clone());
            table.remove_cascading(&key, Propagation::Background, &mut events);
        } else {
            table.objects.insert(key.clone(), object.clone());
            events.push(WatchEvent {
                key,
                kind: WatchEventKind::Applied,
                owners: meta.owners().to_vec(),
            });
        }
        drop(table);

        self.publish(events);
        Ok(object)
    }

    async fn replace_status(&self, kind: &str, object: Value) -> Result<Value, StoreError> {
        let (key, meta) = key_for(kind, &object)?;
        let mut table = self.table.lock().await;
        let mut current = table.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        let mut current_meta = meta_of(&current);
        check_version(&key, &meta, &current_meta)?;

        current_meta.resource_version = Some(table.next_version());
        set_meta(&mut current, &current_meta);
        if let Some(fields) = current.as_object_mut() {
            match object.get("status") {
                Some(status) => {
                    fields.insert("status".into(), status.clone());
                }
                None => {
                    fields.remove("status");
                }
            }
        }

        table.objects.insert(key.clone(), current.clone());
        drop(table);

        self.publish(vec![WatchEvent {
            key,
            kind: WatchEventKind::Applied,
            owners: current_meta.owners().to_vec(),
        }]);
        Ok(current)
    }

    async fn delete(
        &self,
        key: &ObjectKey,
        propagation: Propagation,
    ) -> Result<DeleteOutcome, StoreError> {
        let mut table = self.table.lock().await;
        let Some(current) = table.objects.get(key) else {
            return Ok(DeleteOutcome::Missing);
        };

        let mut events = Vec::new();
        let outcome = if !has_finalizers(&meta_of(current)) {
            table.remove_cascading(key, propagation, &mut events);
            DeleteOutcome::Removed
        } else {
            table.mark_deleting(key, &mut events);
            DeleteOutcome::Finalizing
        };
        drop(table);

        self.publish(events);
        Ok(outcome)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl LogSource for MemoryStore {
    async fn tail(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        lines: usize,
    ) -> Result<String, StoreError> {
        let logs = self.logs.lock().await;
        let text = logs
            .get(&(namespace.to_string(), pod.to_string(), container.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind: "PodLog".into(),
                namespace: namespace.to_string(),
                name: format!("{pod}/{container}"),
            })?;

        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].join("\n"))
    }
}
