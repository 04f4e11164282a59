use super::Config;
use std::path::PathBuf;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(level) = get("AGENTPLANE_LOG_LEVEL").or_else(|| get("RUST_LOG")) {
            self.observability.log_level = level;
        }

        if let Some(namespace) = get("AGENTPLANE_NAMESPACE") {
            self.controller.namespace = Some(namespace);
        }

        if let Some(host) = get("AGENTPLANE_WEBHOOK_HOST") {
            self.webhook.host = host;
        }

        if let Some(port) = get("AGENTPLANE_WEBHOOK_PORT").and_then(|raw| raw.parse::<u16>().ok()) {
            self.webhook.port = port;
        }

        if let Some(image) = get("AGENTPLANE_AGENT_IMAGE") {
            self.workload.agent_image = image;
        }

        if let Some(image) = get("AGENTPLANE_RELAY_IMAGE") {
            self.workload.relay_image = image;
        }

        if let Some(dir) = get("AGENTPLANE_SEED_DIR") {
            self.store.seed_dir = Some(PathBuf::from(dir));
        }
    }
}
