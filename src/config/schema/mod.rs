mod controller;
mod env_overrides;
mod loader;
mod webhook;
mod workload;

pub use controller::ControllerConfig;
pub use webhook::WebhookConfig;
pub use workload::WorkloadConfig;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory of JSON manifests loaded into the local store at startup
    #[serde(default)]
    pub seed_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_component_backoff_secs")]
    pub component_initial_backoff_secs: u64,
    #[serde(default = "default_component_backoff_max_secs")]
    pub component_max_backoff_secs: u64,
    /// Restarts before a component's circuit opens (0 = unlimited)
    #[serde(default = "default_component_max_restarts")]
    pub component_max_restarts: u32,
}

fn default_component_backoff_secs() -> u64 {
    2
}

fn default_component_backoff_max_secs() -> u64 {
    60
}

fn default_component_max_restarts() -> u32 {
    10
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            component_initial_backoff_secs: default_component_backoff_secs(),
            component_max_backoff_secs: default_component_backoff_max_secs(),
            component_max_restarts: default_component_max_restarts(),
        }
    }
}
