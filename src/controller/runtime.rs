//! Level-triggered reconcile loop shared by every controller.
//!
//! One loop per kind. Keys are queued from the initial list, from watch
//! events (the kind itself plus owned objects mapped to their controller
//! owner) and from requeue timers. A key is never reconciled concurrently
//! with itself: a trigger that arrives mid-reconcile marks it dirty and it
//! runs once more when the current pass finishes.

use crate::resources::{Object, ObjectKey};
use crate::store::{LabelSelector, ResourceStore, WatchEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use k8s_openapi::Resource as _;

/// What the loop should do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Requeue(Duration),
    AwaitChange,
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type K: Object;

    /// Kinds whose change events wake their controller owner of kind `K`.
    fn owned_kinds(&self) -> &'static [&'static str] {
        &[]
    }

    async fn reconcile(&self, object: Arc<Self::K>) -> crate::error::Result<Action>;
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Only reconcile objects in this namespace.
    pub namespace: Option<String>,
    pub error_backoff: Duration,
    pub error_backoff_max: Duration,
}

impl RuntimeSettings {
    pub fn from_config(config: &crate::config::ControllerConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            error_backoff: Duration::from_secs(config.error_backoff_secs.max(1)),
            error_backoff_max: Duration::from_secs(
                config.error_backoff_max_secs.max(config.error_backoff_secs.max(1)),
            ),
        }
    }

    /// Delay after the `failures`-th consecutive error (1-based).
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.error_backoff
            .saturating_mul(1 << exponent)
            .min(self.error_backoff_max)
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            namespace: None,
            error_backoff: Duration::from_secs(5),
            error_backoff_max: Duration::from_secs(300),
        }
    }
}

enum Outcome {
    Done(crate::error::Result<Action>),
    Gone,
}

#[derive(Default)]
struct KeyState {
    running: bool,
    dirty: bool,
    timer_seq: u64,
    failures: u32,
}

struct Queue {
    states: HashMap<ObjectKey, KeyState>,
}

/// Drives `reconciler` until `shutdown` is cancelled.
pub async fn run_controller<R: Reconciler>(
    reconciler: Arc<R>,
    store: Arc<dyn ResourceStore>,
    settings: RuntimeSettings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let kind = R::K::KIND;
    let mut watch = store.watch();
    let mut tasks: JoinSet<(ObjectKey, Outcome)> = JoinSet::new();
    let mut timers: JoinSet<(ObjectKey, u64)> = JoinSet::new();
    let mut queue = Queue {
        states: HashMap::new(),
    };

    for key in list_keys(&store, kind, settings.namespace.as_deref()).await? {
        queue.trigger(key, &reconciler, &store, &mut tasks);
    }
    tracing::info!(kind, "Controller started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,

            event = watch.recv() => match event {
                Ok(event) => {
                    let keys = keys_for_event::<R>(
                        &event,
                        reconciler.owned_kinds(),
                        settings.namespace.as_deref(),
                    );
                    for key in keys {
                        queue.trigger(key, &reconciler, &store, &mut tasks);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(kind, missed, "Watch lagged, relisting");
                    for key in list_keys(&store, kind, settings.namespace.as_deref()).await? {
                        queue.trigger(key, &reconciler, &store, &mut tasks);
                    }
                }
                Err(RecvError::Closed) => {
                    anyhow::bail!("{kind} watch channel closed");
                }
            },

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                let Ok((key, outcome)) = joined else {
                    continue;
                };
                if let Some(delay) = queue.finish(&key, outcome, &settings) {
                    let seq = queue.states.get(&key).map_or(0, |s| s.timer_seq);
                    timers.spawn(async move {
                        tokio::time::sleep(delay).await;
                        (key, seq)
                    });
                } else if queue.take_dirty(&key) {
                    queue.trigger(key, &reconciler, &store, &mut tasks);
                }
            },

            Some(Ok((key, seq))) = timers.join_next(), if !timers.is_empty() => {
                let current = queue.states.get(&key).is_some_and(|s| s.timer_seq == seq);
                if current {
                    queue.trigger(key, &reconciler, &store, &mut tasks);
                }
            },
        }
    }

    tasks.abort_all();
    timers.abort_all();
    tracing::info!(kind, "Controller stopped");
    Ok(())
}

impl Queue {
    fn trigger<R: Reconciler>(
        &mut self,
        key: ObjectKey,
        reconciler: &Arc<R>,
        store: &Arc<dyn ResourceStore>,
        tasks: &mut JoinSet<(ObjectKey, Outcome)>,
    ) {
        let state = self.states.entry(key.clone()).or_default();
        if state.running {
            state.dirty = true;
            return;
        }
        state.running = true;
        state.dirty = false;

        let reconciler = Arc::clone(reconciler);
        let store = Arc::clone(store);
        tasks.spawn(async move {
            // The inner task isolates a panicking reconciler so the key is still released.
            let inner_key = key.clone();
            let pass = tokio::spawn(async move {
                reconcile_key(reconciler.as_ref(), &store, &inner_key).await
            });
            let outcome = pass.await.unwrap_or_else(|e| {
                Outcome::Done(Err(anyhow::anyhow!("reconcile task failed: {e}").into()))
            });
            (key, outcome)
        });
    }

    /// Records a finished pass. Returns the delay for the next timer, if any.
    ///
    /// A dirty key is re-run immediately instead of waiting for its timer.
    fn finish(
        &mut self,
        key: &ObjectKey,
        outcome: Outcome,
        settings: &RuntimeSettings,
    ) -> Option<Duration> {
        let Some(state) = self.states.get_mut(key) else {
            return None;
        };
        state.running = false;
        state.timer_seq += 1;

        let delay = match outcome {
            Outcome::Gone => {
                if !state.dirty {
                    self.states.remove(key);
                }
                return None;
            }
            Outcome::Done(Ok(Action::Requeue(delay))) => {
                state.failures = 0;
                Some(delay)
            }
            Outcome::Done(Ok(Action::AwaitChange)) => {
                state.failures = 0;
                None
            }
            Outcome::Done(Err(e)) => {
                state.failures = state.failures.saturating_add(1);
                let delay = settings.backoff_for(state.failures);
                tracing::warn!(
                    object = %key,
                    failures = state.failures,
                    retry_in = ?delay,
                    "Reconcile failed: {e}"
                );
                Some(delay)
            }
        };

        if state.dirty { None } else { delay }
    }

    fn take_dirty(&mut self, key: &ObjectKey) -> bool {
        self.states
            .get_mut(key)
            .is_some_and(|state| std::mem::take(&mut state.dirty))
    }
}

async fn reconcile_key<R: Reconciler>(
    reconciler: &R,
    store: &Arc<dyn ResourceStore>,
    key: &ObjectKey,
) -> Outcome {
    let value = match store.get(key).await {
        Ok(Some(value)) => value,
        Ok(None) => return Outcome::Gone,
        Err(e) => return Outcome::Done(Err(e.into())),
    };
    let object: R::K = match serde_json::from_value(value) {
        Ok(object) => object,
        Err(e) => return Outcome::Done(Err(crate::error::StoreError::from(e).into())),
    };
    Outcome::Done(reconciler.reconcile(Arc::new(object)).await)
}

async fn list_keys(
    store: &Arc<dyn ResourceStore>,
    kind: &str,
    namespace: Option<&str>,
) -> anyhow::Result<Vec<ObjectKey>> {
    let objects = store.list(kind, namespace, &LabelSelector::everything()).await?;
    Ok(objects
        .iter()
        .filter_map(|value| {
            let meta = value.get("metadata")?;
            let name = meta.get("name")?.as_str()?;
            let namespace = meta.get("namespace").and_then(|ns| ns.as_str()).unwrap_or("");
            Some(ObjectKey::new(kind, namespace, name))
        })
        .collect())
}

/// Keys of kind `R::K` woken by `event`.
fn keys_for_event<R: Reconciler>(
    event: &WatchEvent,
    owned_kinds: &[&str],
    namespace: Option<&str>,
) -> Vec<ObjectKey> {
    if namespace.is_some_and(|ns| ns != event.key.namespace) {
        return Vec::new();
    }
    if event.key.kind == R::K::KIND {
        return vec![event.key.clone()];
    }
    if !owned_kinds.contains(&event.key.kind.as_str()) {
        return Vec::new();
    }
    event
        .owners
        .iter()
        .filter(|owner| owner.controller.unwrap_or(false) && owner.kind == R::K::KIND)
        .map(|owner| ObjectKey::new(R::K::KIND, &event.key.namespace, &owner.name))
        .collect()
}
