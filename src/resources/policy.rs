use super::meta::custom_resource;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FEATURE_CODE_EXECUTION: &str = "code-execution";
pub const FEATURE_SUB_AGENTS: &str = "sub-agents";

/// A named bundle of tool-gating, sandbox, sub-agent and feature-gate rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPolicy {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PolicySpec,
}

custom_resource!(AgentPolicy, "AgentPolicy", "agentpolicies");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_gating: Vec<ToolRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_policy: Option<SubagentPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_policy: Option<SandboxPolicy>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_gates: BTreeMap<String, bool>,
}

impl PolicySpec {
    pub fn sandbox_required(&self) -> bool {
        self.sandbox_policy.as_ref().is_some_and(|s| s.required)
    }

    pub fn default_sandbox_image(&self) -> Option<&str> {
        self.sandbox_policy
            .as_ref()
            .and_then(|s| s.default_image.as_deref())
    }

    /// A gate is off only when the policy names it and sets it to `false`.
    pub fn feature_disabled(&self, gate: &str) -> bool {
        self.feature_gates.get(gate) == Some(&false)
    }

    pub fn denies_tool(&self, tool: &str) -> bool {
        self.tool_gating
            .iter()
            .any(|rule| rule.action == ToolAction::Deny && rule.tool == tool)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRule {
    pub tool: String,
    pub action: ToolAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentPolicy {
    #[serde(default)]
    pub max_depth: u32,
    #[serde(default)]
    pub max_concurrent: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPolicy {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,
    #[serde(default, rename = "maxCPU", skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<String>,
}
