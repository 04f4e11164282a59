pub mod schema;

pub use schema::{
    Config, ControllerConfig, ObservabilityConfig, ReliabilityConfig, StoreConfig, WebhookConfig,
    WorkloadConfig,
};
