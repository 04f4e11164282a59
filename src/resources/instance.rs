use super::meta::custom_resource;
use super::run::{ModelSpec, SkillRef};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Key under which the memory artifact stores its text.
pub const MEMORY_KEY: &str = "MEMORY.md";

/// A tenant identity: credentials, default model, skills and policy binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: InstanceSpec,
}

custom_resource!(AgentInstance, "AgentInstance", "agentinstances");

impl AgentInstance {
    pub fn memory_enabled(&self) -> bool {
        self.spec.memory.as_ref().is_some_and(|m| m.enabled)
    }

    pub fn policy_ref(&self) -> Option<&str> {
        self.spec
            .policy_ref
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

/// Name of the config object holding an instance's memory artifact.
pub fn memory_config_map_name(instance: &str) -> String {
    format!("{instance}-memory")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(default)]
    pub model: ModelSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<SkillRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySpec {
    #[serde(default)]
    pub enabled: bool,
}
