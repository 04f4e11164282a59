use crate::error::PolicyViolation;
use crate::resources::{AgentRun, FEATURE_CODE_EXECUTION, FEATURE_SUB_AGENTS, PolicySpec};

/// Reconcile-time check. A zero limit means the limit is unset.
pub fn reconcile_verdict(
    run: &AgentRun,
    policy: Option<&PolicySpec>,
    running_for_instance: u32,
) -> Result<(), PolicyViolation> {
    let Some(subagents) = policy.and_then(|policy| policy.subagent_policy) else {
        return Ok(());
    };

    if let Some(depth) = run.spec.spawn_depth()
        && subagents.max_depth > 0
        && depth > subagents.max_depth
    {
        return Err(PolicyViolation::new(format!(
            "spawn depth {depth} exceeds policy max depth {}",
            subagents.max_depth
        )));
    }

    if subagents.max_concurrent > 0 && running_for_instance >= subagents.max_concurrent {
        return Err(PolicyViolation::new(format!(
            "instance already has {running_for_instance} running runs (max concurrent {})",
            subagents.max_concurrent
        )));
    }

    Ok(())
}

/// Write-time check, evaluated in order; the first failure wins.
pub fn admission_verdict(
    run: &AgentRun,
    policy: Option<&PolicySpec>,
) -> Result<(), PolicyViolation> {
    if let Some(policy) = policy {
        if policy.sandbox_required() && !run.spec.sandbox_enabled() {
            return Err(PolicyViolation::new(
                "policy requires a sandbox but the run does not enable one",
            ));
        }

        if let (Some(depth), Some(subagents)) = (run.spec.spawn_depth(), policy.subagent_policy)
            && subagents.max_depth > 0
            && depth >= subagents.max_depth
        {
            return Err(PolicyViolation::new(format!(
                "spawn depth {depth} reaches policy max depth {}",
                subagents.max_depth
            )));
        }

        if let Some(tools) = &run.spec.tool_policy
            && let Some(tool) = tools.allow.iter().find(|tool| policy.denies_tool(tool))
        {
            return Err(PolicyViolation::new(format!(
                "tool '{tool}' is allowed by the run but denied by policy"
            )));
        }

        if run.spec.sandbox_enabled() && policy.feature_disabled(FEATURE_CODE_EXECUTION) {
            return Err(PolicyViolation::new(format!(
                "sandbox requested but feature gate '{FEATURE_CODE_EXECUTION}' is disabled"
            )));
        }

        if run.spec.parent.is_some() && policy.feature_disabled(FEATURE_SUB_AGENTS) {
            return Err(PolicyViolation::new(format!(
                "spawned run but feature gate '{FEATURE_SUB_AGENTS}' is disabled"
            )));
        }
    }

    if let Err(error) = run.spec.timeout_duration() {
        return Err(PolicyViolation::new(format!("invalid timeout: {error}")));
    }

    Ok(())
}
