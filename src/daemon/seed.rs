//! Loads JSON manifests from the configured seed directory into the store.
//!
//! Each `*.json` file holds one object or an array of objects, dispatched by
//! their `kind`. Policies, instances and config maps are applied before
//! schedules and runs so admission sees the bindings it needs. Runs go through
//! admission (mutate, then validate) exactly as a live write would.

use crate::resources::{AgentInstance, AgentPolicy, AgentRun, AgentSchedule, Object};
use crate::store::{Api, ResourceStore};
use crate::webhook::Admission;
use anyhow::{Context, Result};
use k8s_openapi::Resource;
use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_NAMESPACE: &str = "default";

/// Outcome of one seed pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub applied: usize,
    pub existing: usize,
    /// `(object, reason)` for every run admission refused.
    pub denied: Vec<(String, String)>,
    pub skipped: usize,
}

fn apply_order(kind: &str) -> u8 {
    match kind {
        AgentPolicy::KIND => 0,
        AgentInstance::KIND | ConfigMap::KIND => 1,
        AgentSchedule::KIND => 2,
        _ => 3,
    }
}

pub async fn load_seed_dir(store: &Arc<dyn ResourceStore>, dir: &Path) -> Result<SeedReport> {
    let mut manifests = read_manifests(dir).await?;
    manifests.sort_by_key(|(_, value)| apply_order(kind_of(value)));

    let admission = Admission::new(Arc::clone(store));
    let mut report = SeedReport::default();
    for (path, value) in manifests {
        let kind = kind_of(&value).to_string();
        let outcome = match kind.as_str() {
            AgentPolicy::KIND => create::<AgentPolicy>(store, value).await,
            AgentInstance::KIND => create::<AgentInstance>(store, value).await,
            ConfigMap::KIND => create::<ConfigMap>(store, value).await,
            AgentSchedule::KIND => create::<AgentSchedule>(store, value).await,
            AgentRun::KIND => {
                let mut run: AgentRun = serde_json::from_value(value)
                    .with_context(|| format!("Invalid AgentRun in {}", path.display()))?;
                if run.namespace().is_empty() {
                    run.metadata.namespace = Some(DEFAULT_NAMESPACE.into());
                }
                match admission.admit(&run).await {
                    Ok(admitted) => create_typed(store, &admitted).await,
                    Err(violation) => {
                        tracing::warn!(
                            run = run.name(),
                            reason = %violation.reason,
                            "Seed run denied by admission"
                        );
                        report.denied.push((run.name().to_string(), violation.reason));
                        continue;
                    }
                }
            }
            other => {
                tracing::warn!(
                    kind = other,
                    file = %path.display(),
                    "Skipping seed object of unknown kind"
                );
                report.skipped += 1;
                continue;
            }
        };
        match outcome.with_context(|| format!("Failed to seed {kind} from {}", path.display()))? {
            Created::New => report.applied += 1,
            Created::Existing => report.existing += 1,
        }
    }

    tracing::info!(
        dir = %dir.display(),
        applied = report.applied,
        existing = report.existing,
        denied = report.denied.len(),
        "Seed directory loaded"
    );
    Ok(report)
}

enum Created {
    New,
    Existing,
}

async fn create<K: Object>(store: &Arc<dyn ResourceStore>, value: Value) -> Result<Created> {
    let object: K = serde_json::from_value(value)?;
    create_typed(store, &object).await
}

async fn create_typed<K: Object>(
    store: &Arc<dyn ResourceStore>,
    object: &K,
) -> Result<Created> {
    let namespace = if object.namespace().is_empty() {
        DEFAULT_NAMESPACE
    } else {
        object.namespace()
    };
    let api: Api<K> = Api::namespaced(Arc::clone(store), namespace);
    match api.create(object).await {
        Ok(_) => Ok(Created::New),
        Err(e) if e.is_already_exists() => Ok(Created::Existing),
        Err(e) => Err(e.into()),
    }
}

fn kind_of(value: &Value) -> &str {
    value.get("kind").and_then(Value::as_str).unwrap_or_default()
}

async fn read_manifests(dir: &Path) -> Result<Vec<(PathBuf, Value)>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read seed directory {}", dir.display()))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut manifests = Vec::new();
    for path in paths {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        match parsed {
            Value::Array(items) => {
                manifests.extend(items.into_iter().map(|item| (path.clone(), item)));
            }
            item => manifests.push((path, item)),
        }
    }
    Ok(manifests)
}
