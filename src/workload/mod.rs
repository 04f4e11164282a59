//! Maps a run onto the job descriptor that executes it.
//!
//! Building is pure: everything the builder needs (policy, memory flag,
//! workload settings) is passed in by the caller, which reads it fresh.

mod builder;

pub use builder::{
    BuildContext, build_input_config_map, build_job, input_config_map_name, job_name,
};

use k8s_openapi::api::core::v1::Pod;

pub const AGENT_CONTAINER: &str = "agent";
pub const RELAY_CONTAINER: &str = "ipc-bridge";
pub const SANDBOX_CONTAINER: &str = "sandbox";

pub const WORKSPACE_VOLUME: &str = "workspace";
pub const IPC_VOLUME: &str = "ipc";
pub const TMP_VOLUME: &str = "tmp";
pub const SKILLS_VOLUME: &str = "skills";
pub const MEMORY_VOLUME: &str = "memory";
pub const INPUT_VOLUME: &str = "input";

pub const WORKSPACE_PATH: &str = "/workspace";
pub const IPC_PATH: &str = "/ipc";
pub const TMP_PATH: &str = "/tmp";
pub const SKILLS_PATH: &str = "/skills";
pub const MEMORY_PATH: &str = "/memory";
pub const INPUT_PATH: &str = "/input";

/// Exit code of `container` once it has terminated.
pub fn container_exit_code(pod: &Pod, container: &str) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|status| status.name == container)?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|terminated| terminated.exit_code)
}
