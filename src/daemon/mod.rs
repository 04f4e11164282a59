//! Long-running process: reconcilers and the admission webhook under a
//! restart supervisor, sharing one in-process store.

use crate::config::Config;
use crate::store::{LogSource, MemoryStore, ResourceStore};
use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod seed;
mod supervisor;

pub use seed::{SeedReport, load_seed_dir};
use supervisor::{Backoff, spawn_component_supervisor};

/// Which components a process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Components {
    pub controllers: bool,
    pub webhook: bool,
}

impl Components {
    pub const ALL: Self = Self {
        controllers: true,
        webhook: true,
    };
    pub const CONTROLLERS: Self = Self {
        controllers: true,
        webhook: false,
    };
    pub const WEBHOOK: Self = Self {
        controllers: false,
        webhook: true,
    };
}

/// Runs the selected components until Ctrl-C.
pub async fn run(config: Arc<Config>, components: Components) -> Result<()> {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn ResourceStore> = memory.clone();
    let logs: Arc<dyn LogSource> = memory;

    if let Some(dir) = &config.store.seed_dir {
        let report = load_seed_dir(&store, dir).await?;
        for (run, reason) in &report.denied {
            tracing::warn!(run = %run, reason = %reason, "Seed run not admitted");
        }
    }

    let shutdown = CancellationToken::new();
    let handles = spawn_supervised_components(
        Arc::clone(&config),
        store,
        logs,
        components,
        shutdown.clone(),
    );

    tracing::info!(
        controllers = components.controllers,
        webhook = components.webhook,
        namespace = config.controller.namespace.as_deref().unwrap_or("*"),
        "agentplane started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

fn spawn_supervised_components(
    config: Arc<Config>,
    store: Arc<dyn ResourceStore>,
    logs: Arc<dyn LogSource>,
    components: Components,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let backoff = Backoff::from_config(&config.reliability);
    let mut handles = Vec::new();

    if components.controllers {
        let cfg = Arc::clone(&config);
        let store = Arc::clone(&store);
        let token = shutdown.clone();
        handles.push(spawn_component_supervisor(
            "controllers",
            backoff,
            shutdown.clone(),
            move || {
                let cfg = Arc::clone(&cfg);
                let store = Arc::clone(&store);
                let logs = Arc::clone(&logs);
                let token = token.clone();
                async move { crate::controller::run_all(cfg, store, logs, token).await }
            },
        ));
    }

    if components.webhook {
        let cfg = config;
        let token = shutdown.clone();
        handles.push(spawn_component_supervisor(
            "webhook",
            backoff,
            shutdown,
            move || {
                let cfg = Arc::clone(&cfg);
                let store = Arc::clone(&store);
                let token = token.clone();
                async move { crate::webhook::run_webhook(store, &cfg.webhook, token).await }
            },
        ));
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AgentInstance, AgentRun, RunPhase, object_meta};
    use crate::store::Api;
    use std::time::Duration;

    #[tokio::test]
    async fn controllers_component_reconciles_and_stops() {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn ResourceStore> = memory.clone();
        Api::<AgentInstance>::namespaced(Arc::clone(&store), "team")
            .create(&AgentInstance {
                metadata: object_meta("team", "alice"),
                ..AgentInstance::default()
            })
            .await
            .unwrap();
        let runs: Api<AgentRun> = Api::namespaced(Arc::clone(&store), "team");
        let mut run = AgentRun::default();
        run.metadata = object_meta("team", "r1");
        run.spec.instance_ref = "alice".into();
        run.spec.task = "t".into();
        runs.create(&run).await.unwrap();

        let shutdown = CancellationToken::new();
        let handles = spawn_supervised_components(
            Arc::new(Config::default()),
            Arc::clone(&store),
            memory,
            Components::CONTROLLERS,
            shutdown.clone(),
        );

        let mut phase = RunPhase::Pending;
        for _ in 0..100 {
            phase = runs.get("r1").await.unwrap().status.phase;
            if phase == RunPhase::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(phase, RunPhase::Running);

        shutdown.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
