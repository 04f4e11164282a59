use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Admission server host (default: 0.0.0.0)
    #[serde(default = "default_webhook_host")]
    pub host: String,
    /// Admission server port (default: 8443)
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    /// Per-request deadline; the store's admission pipeline gives up soon after
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum admission review body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_webhook_host() -> String {
    "0.0.0.0".into()
}

fn default_webhook_port() -> u16 {
    8443
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: default_webhook_host(),
            port: default_webhook_port(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}
