//! Reconcilers for runs and schedules plus the loop that drives them.

pub mod agentrun;
pub mod cron;
pub mod extraction;
pub mod runtime;
pub mod schedule;

pub use agentrun::AgentRunReconciler;
pub use runtime::{Action, Reconciler, RuntimeSettings, run_controller};
pub use schedule::ScheduleReconciler;

use crate::config::Config;
use crate::error::StoreError;
use crate::resources::Object;
use crate::store::{Api, LogSource, ResourceStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONFLICT_RETRIES: usize = 5;

/// Applies `mutate` and writes the status subresource, re-fetching and
/// reapplying on a version conflict. `mutate` returns `false` to skip the write.
pub(crate) async fn update_status<K, F>(
    api: &Api<K>,
    current: &K,
    mut mutate: F,
) -> Result<K, StoreError>
where
    K: Object,
    F: FnMut(&mut K) -> bool,
{
    let mut object = current.clone();
    let mut attempt = 0;
    loop {
        if !mutate(&mut object) {
            return Ok(object);
        }
        match api.replace_status(&object).await {
            Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                attempt += 1;
                tracing::debug!(
                    object = object.name(),
                    attempt,
                    "Status write conflicted, retrying"
                );
                let name = object.name().to_string();
                object = api.get(&name).await?;
            }
            other => return other,
        }
    }
}

/// Same as [`update_status`] for the metadata/spec path.
pub(crate) async fn update_object<K, F>(
    api: &Api<K>,
    current: &K,
    mut mutate: F,
) -> Result<K, StoreError>
where
    K: Object,
    F: FnMut(&mut K) -> bool,
{
    let mut object = current.clone();
    let mut attempt = 0;
    loop {
        if !mutate(&mut object) {
            return Ok(object);
        }
        match api.replace(&object).await {
            Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                attempt += 1;
                tracing::debug!(object = object.name(), attempt, "Write conflicted, retrying");
                let name = object.name().to_string();
                object = api.get(&name).await?;
            }
            other => return other,
        }
    }
}

/// Runs both reconcilers until `shutdown` fires or one of them fails.
pub async fn run_all(
    config: Arc<Config>,
    store: Arc<dyn ResourceStore>,
    logs: Arc<dyn LogSource>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let settings = RuntimeSettings::from_config(&config.controller);
    let runs = Arc::new(AgentRunReconciler::new(
        Arc::clone(&store),
        logs,
        Arc::clone(&config),
    ));
    let schedules = Arc::new(ScheduleReconciler::new(Arc::clone(&store), Arc::clone(&config)));

    tokio::try_join!(
        run_controller(runs, Arc::clone(&store), settings.clone(), shutdown.clone()),
        run_controller(schedules, store, settings, shutdown),
    )?;
    Ok(())
}
