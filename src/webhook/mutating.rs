use super::Admission;
use crate::resources::{
    ANNOTATION_DISABLE_TOKEN, AgentRun, LABEL_ROLE, LABEL_SANDBOX, Object, ObjectMetaExt,
    PolicySpec, ROLE_AGENT_RUN, SandboxSpec, ToolAction, ToolPolicySpec,
};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use std::collections::BTreeMap;

/// A run after defaulting, plus the JSON Patch that produces it.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub run: AgentRun,
    pub patch: json_patch::Patch,
}

impl Mutation {
    pub fn is_noop(&self) -> bool {
        self.patch.0.is_empty()
    }
}

/// Applies policy defaults and isolation markers to `run`.
///
/// Every step only fills what is absent, so mutating an already mutated run
/// yields an empty patch.
pub fn mutate(
    run: &AgentRun,
    policy: Option<&PolicySpec>,
) -> Result<Mutation, serde_json::Error> {
    let mut mutated = run.clone();

    if let Some(policy) = policy {
        if policy.sandbox_required() && !mutated.spec.sandbox_enabled() {
            let image = mutated
                .spec
                .sandbox
                .as_ref()
                .and_then(|sandbox| sandbox.image.clone())
                .or_else(|| policy.default_sandbox_image().map(str::to_string));
            mutated.spec.sandbox = Some(SandboxSpec {
                enabled: true,
                image,
            });
        }

        if mutated.spec.tool_policy.is_none() && !policy.tool_gating.is_empty() {
            mutated.spec.tool_policy = Some(tool_policy_from(policy));
        }
    }

    let sandboxed = mutated.spec.sandbox_enabled();
    let meta = &mut mutated.metadata;
    stamp(meta.labels_mut(), LABEL_ROLE, ROLE_AGENT_RUN);
    if sandboxed {
        stamp(meta.labels_mut(), LABEL_SANDBOX, "true");
    }
    stamp(
        meta.annotations.get_or_insert_with(BTreeMap::new),
        ANNOTATION_DISABLE_TOKEN,
        "true",
    );

    let patch = json_patch::diff(&serde_json::to_value(run)?, &serde_json::to_value(&mutated)?);
    Ok(Mutation {
        run: mutated,
        patch,
    })
}

fn tool_policy_from(policy: &PolicySpec) -> ToolPolicySpec {
    let mut tool_policy = ToolPolicySpec::default();
    for rule in &policy.tool_gating {
        let list = match rule.action {
            ToolAction::Allow => &mut tool_policy.allow,
            ToolAction::Deny => &mut tool_policy.deny,
        };
        if !list.contains(&rule.tool) {
            list.push(rule.tool.clone());
        }
    }
    tool_policy
}

/// Sets `key` only when absent.
fn stamp(map: &mut BTreeMap<String, String>, key: &str, value: &str) {
    map.entry(key.to_string())
        .or_insert_with(|| value.to_string());
}

impl Admission {
    /// Handles one mutating review. Never denies.
    pub async fn review_mutate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> AdmissionResponse {
        let response = AdmissionResponse::from(request);
        let Some(run) = self.run_under_review(request) else {
            return response;
        };
        let run = match run {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!(
                    uid = %request.uid,
                    error = %e,
                    "Skipping mutation of unreadable AgentRun"
                );
                return response;
            }
        };

        let policy = self.policy_for(&run).await;
        let mutation = match mutate(&run, policy.as_ref()) {
            Ok(mutation) => mutation,
            Err(e) => {
                tracing::warn!(
                    uid = %request.uid,
                    error = %e,
                    "Mutation failed, admitting unchanged"
                );
                return response;
            }
        };
        if mutation.is_noop() {
            return response;
        }

        tracing::debug!(
            uid = %request.uid,
            run = run.name(),
            namespace = run.namespace(),
            ops = mutation.patch.0.len(),
            "Mutating AgentRun"
        );
        match response.with_patch(mutation.patch) {
            Ok(patched) => patched,
            Err(e) => {
                tracing::warn!(uid = %request.uid, error = %e, "Failed to encode patch");
                AdmissionResponse::from(request)
            }
        }
    }
}
