use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Image for the main agent container
    #[serde(default = "default_agent_image")]
    pub agent_image: String,
    /// Image for the message-relay sidecar
    #[serde(default = "default_relay_image")]
    pub relay_image: String,
    /// Sandbox image when neither the run nor the policy names one
    #[serde(default = "default_sandbox_image")]
    pub sandbox_image: String,
    /// Execution identity ensured in every run namespace
    #[serde(default = "default_service_account")]
    pub service_account: String,
    #[serde(default = "default_run_as_id")]
    pub run_as_user: i64,
    #[serde(default = "default_run_as_id")]
    pub run_as_group: i64,
    /// Seconds a finished workload lingers before garbage collection
    #[serde(default = "default_ttl_seconds_after_finished")]
    pub ttl_seconds_after_finished: u32,
    /// Active deadline when the run sets no timeout
    #[serde(default = "default_deadline_secs")]
    pub default_deadline_secs: u64,
    /// Added to the run timeout to form the workload's active deadline
    #[serde(default = "default_deadline_grace_secs")]
    pub deadline_grace_secs: u64,
}

fn default_agent_image() -> String {
    "ghcr.io/agentplane/agent-runner:latest".into()
}

fn default_relay_image() -> String {
    "ghcr.io/agentplane/ipc-bridge:latest".into()
}

fn default_sandbox_image() -> String {
    "ghcr.io/agentplane/sandbox:latest".into()
}

fn default_service_account() -> String {
    "agentplane-agent".into()
}

fn default_run_as_id() -> i64 {
    1000
}

fn default_ttl_seconds_after_finished() -> u32 {
    300
}

fn default_deadline_secs() -> u64 {
    600
}

fn default_deadline_grace_secs() -> u64 {
    60
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            agent_image: default_agent_image(),
            relay_image: default_relay_image(),
            sandbox_image: default_sandbox_image(),
            service_account: default_service_account(),
            run_as_user: default_run_as_id(),
            run_as_group: default_run_as_id(),
            ttl_seconds_after_finished: default_ttl_seconds_after_finished(),
            default_deadline_secs: default_deadline_secs(),
            deadline_grace_secs: default_deadline_grace_secs(),
        }
    }
}
