use anyhow::Result;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Restart bounds for one supervised component.
#[derive(Debug, Clone, Copy)]
pub(super) struct Backoff {
    pub initial_secs: u64,
    pub max_secs: u64,
    /// Consecutive failures tolerated before the circuit opens (0 = unlimited).
    pub max_restarts: u32,
}

impl Backoff {
    pub(super) fn from_config(config: &crate::config::ReliabilityConfig) -> Self {
        let initial_secs = config.component_initial_backoff_secs.max(1);
        Self {
            initial_secs,
            max_secs: config.component_max_backoff_secs.max(initial_secs),
            max_restarts: config.component_max_restarts,
        }
    }
}

/// Keeps `run_component` alive until `shutdown` fires, restarting it with
/// exponential backoff whenever it fails or returns early.
pub(super) fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    backoff_bounds: Backoff,
    shutdown: CancellationToken,
    mut run_component: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let initial = backoff_bounds.initial_secs.max(1);
        let max_backoff = backoff_bounds.max_secs.max(initial);
        let mut backoff = initial;
        let mut consecutive_failures: u32 = 0;

        loop {
            tracing::info!(component = name, "Component starting");
            let outcome = run_component().await;
            if shutdown.is_cancelled() {
                tracing::info!(component = name, "Component stopped");
                break;
            }
            match outcome {
                Ok(()) => {
                    tracing::warn!(component = name, "Component exited unexpectedly");
                    backoff = initial;
                }
                Err(e) => {
                    tracing::error!(component = name, error = %e, "Component failed");
                }
            }
            consecutive_failures = consecutive_failures.saturating_add(1);

            if backoff_bounds.max_restarts > 0 && consecutive_failures > backoff_bounds.max_restarts
            {
                tracing::error!(
                    component = name,
                    max_restarts = backoff_bounds.max_restarts,
                    "Component exceeded max restarts, circuit open"
                );
                break;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(Duration::from_secs(backoff)) => {}
            }
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    })
}
