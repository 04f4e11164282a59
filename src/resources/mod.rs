mod duration;
mod instance;
mod meta;
mod policy;
mod run;
mod schedule;

pub use duration::parse_duration;
pub use instance::{AgentInstance, InstanceSpec, MEMORY_KEY, MemorySpec, memory_config_map_name};
pub use meta::{Object, ObjectKey, ObjectMetaExt, object_meta};
pub use policy::{
    AgentPolicy, FEATURE_CODE_EXECUTION, FEATURE_SUB_AGENTS, PolicySpec, SandboxPolicy,
    SubagentPolicy, ToolAction, ToolRule,
};
pub use run::{
    AgentRun, AgentRunSpec, AgentRunStatus, CleanupPolicy, ModelSpec, ParentRef, RunPhase,
    SandboxSpec, SkillRef, ToolPolicySpec,
};
pub use schedule::{
    AgentSchedule, ConcurrencyPolicy, SchedulePhase, ScheduleSpec, ScheduleStatus,
};

pub const GROUP: &str = "agentplane.dev";
pub const VERSION: &str = "v1alpha1";
pub const API_VERSION: &str = "agentplane.dev/v1alpha1";

// ── Well-known labels, annotations and finalizers ───────────────────────────

pub const LABEL_INSTANCE: &str = "agentplane.dev/instance";
pub const LABEL_AGENT_RUN: &str = "agentplane.dev/agent-run";
pub const LABEL_SCHEDULE: &str = "agentplane.dev/schedule";
pub const LABEL_SCHEDULE_TYPE: &str = "agentplane.dev/schedule-type";
pub const LABEL_JOB_NAME: &str = "job-name";
pub const LABEL_ROLE: &str = "agentplane.dev/role";
pub const LABEL_SANDBOX: &str = "agentplane.dev/sandbox";
pub const ANNOTATION_DISABLE_TOKEN: &str = "agentplane.dev/disable-token-mount";

pub const ROLE_AGENT_RUN: &str = "agent-run";

pub const RUN_FINALIZER: &str = "agentplane.dev/cleanup";
