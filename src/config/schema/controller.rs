use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Restrict reconciliation to one namespace (default: all)
    #[serde(default)]
    pub namespace: Option<String>,
    /// Re-check interval for pending/running runs (default: 5s)
    #[serde(default = "default_run_recheck_secs")]
    pub run_recheck_secs: u64,
    /// Upper bound on a schedule's re-check delay (default: 60s)
    #[serde(default = "default_schedule_max_recheck_secs")]
    pub schedule_max_recheck_secs: u64,
    /// Re-check delay when a Forbid schedule skips a fire (default: 30s)
    #[serde(default = "default_forbid_recheck_secs")]
    pub forbid_recheck_secs: u64,
    /// Re-check delay for suspended or errored schedules (default: 60s)
    #[serde(default = "default_idle_recheck_secs")]
    pub idle_recheck_secs: u64,
    /// First delay after an unexpected reconcile error (default: 5s)
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Cap on the reconcile error backoff (default: 300s)
    #[serde(default = "default_error_backoff_max_secs")]
    pub error_backoff_max_secs: u64,
    /// Lines of agent log read for result extraction (default: 200)
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

fn default_run_recheck_secs() -> u64 {
    5
}

fn default_schedule_max_recheck_secs() -> u64 {
    60
}

fn default_forbid_recheck_secs() -> u64 {
    30
}

fn default_idle_recheck_secs() -> u64 {
    60
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_error_backoff_max_secs() -> u64 {
    300
}

fn default_log_tail_lines() -> usize {
    200
}

impl ControllerConfig {
    pub fn run_recheck(&self) -> Duration {
        Duration::from_secs(self.run_recheck_secs)
    }

    pub fn schedule_max_recheck(&self) -> Duration {
        Duration::from_secs(self.schedule_max_recheck_secs)
    }

    pub fn forbid_recheck(&self) -> Duration {
        Duration::from_secs(self.forbid_recheck_secs)
    }

    pub fn idle_recheck(&self) -> Duration {
        Duration::from_secs(self.idle_recheck_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            run_recheck_secs: default_run_recheck_secs(),
            schedule_max_recheck_secs: default_schedule_max_recheck_secs(),
            forbid_recheck_secs: default_forbid_recheck_secs(),
            idle_recheck_secs: default_idle_recheck_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            error_backoff_max_secs: default_error_backoff_max_secs(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}
