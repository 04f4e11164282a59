//! Policy checks shared by the run reconciler and the admission webhook.
//!
//! Both entry points resolve Instance → Policy fresh from the store and fail
//! open when either is missing. The two depth checks are deliberately not the
//! same: admission denies at `depth >= max`, the reconciler at `depth > max`.

mod rules;

pub use rules::{admission_verdict, reconcile_verdict};

use crate::error::StoreError;
use crate::resources::{AgentInstance, AgentPolicy, AgentRun, LABEL_INSTANCE, RunPhase};
use crate::store::{Api, LabelSelector, ResourceStore};
use std::sync::Arc;

/// Instance and policy bound to a run, as read from the store right now.
#[derive(Debug, Clone, Default)]
pub struct PolicyBinding {
    pub instance: Option<AgentInstance>,
    pub policy: Option<AgentPolicy>,
}

impl PolicyBinding {
    pub fn policy_spec(&self) -> Option<&crate::resources::PolicySpec> {
        self.policy.as_ref().map(|policy| &policy.spec)
    }
}

/// Resolves the run's Instance and then the Policy it binds.
pub async fn resolve_binding(
    store: &Arc<dyn ResourceStore>,
    namespace: &str,
    instance_name: &str,
) -> Result<PolicyBinding, StoreError> {
    let instances: Api<AgentInstance> = Api::namespaced(Arc::clone(store), namespace);
    let Some(instance) = instances.get_opt(instance_name).await? else {
        return Ok(PolicyBinding::default());
    };

    let policy = match instance.policy_ref() {
        Some(policy_name) => {
            let policies: Api<AgentPolicy> = Api::namespaced(Arc::clone(store), namespace);
            policies.get_opt(policy_name).await?
        }
        None => None,
    };

    Ok(PolicyBinding {
        instance: Some(instance),
        policy,
    })
}

/// Counts runs of `instance` currently in the Running phase.
///
/// Correct as of the read only; concurrent reconciles may both see room.
pub async fn running_runs_for_instance(
    store: &Arc<dyn ResourceStore>,
    namespace: &str,
    instance_name: &str,
) -> Result<u32, StoreError> {
    let runs: Api<AgentRun> = Api::namespaced(Arc::clone(store), namespace);
    let selector = LabelSelector::label(LABEL_INSTANCE, instance_name);
    let running = runs
        .list(&selector)
        .await?
        .iter()
        .filter(|run| run.status.phase == RunPhase::Running)
        .count();
    Ok(u32::try_from(running).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{InstanceSpec, ObjectMetaExt, PolicySpec, object_meta};
    use crate::store::MemoryStore;

    async fn seed_instance(store: &Arc<dyn ResourceStore>, policy_ref: Option<&str>) {
        let api: Api<AgentInstance> = Api::namespaced(Arc::clone(store), "team");
        api.create(&AgentInstance {
            metadata: object_meta("team", "alice"),
            spec: InstanceSpec {
                policy_ref: policy_ref.map(str::to_string),
                ..InstanceSpec::default()
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_instance_resolves_to_empty_binding() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let binding = resolve_binding(&store, "team", "ghost").await.unwrap();
        assert!(binding.instance.is_none());
        assert!(binding.policy.is_none());
    }

    #[tokio::test]
    async fn dangling_policy_ref_resolves_without_policy() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        seed_instance(&store, Some("strict")).await;
        let binding = resolve_binding(&store, "team", "alice").await.unwrap();
        assert!(binding.instance.is_some());
        assert!(binding.policy.is_none());
    }

    #[tokio::test]
    async fn bound_policy_is_resolved() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        seed_instance(&store, Some("strict")).await;
        let policies: Api<AgentPolicy> = Api::namespaced(Arc::clone(&store), "team");
        policies
            .create(&AgentPolicy {
                metadata: object_meta("team", "strict"),
                spec: PolicySpec::default(),
            })
            .await
            .unwrap();
        let binding = resolve_binding(&store, "team", "alice").await.unwrap();
        assert_eq!(binding.policy.unwrap().metadata.name.as_deref(), Some("strict"));
    }

    #[tokio::test]
    async fn running_count_only_counts_running_runs_of_instance() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let runs: Api<AgentRun> = Api::namespaced(Arc::clone(&store), "team");
        for (name, instance, phase) in [
            ("a", "alice", RunPhase::Running),
            ("b", "alice", RunPhase::Running),
            ("c", "alice", RunPhase::Succeeded),
            ("d", "alice", RunPhase::Pending),
            ("e", "bob", RunPhase::Running),
        ] {
            let mut run = AgentRun::default();
            run.metadata = object_meta("team", name).with_label(LABEL_INSTANCE, instance);
            let created = runs.create(&run).await.unwrap();
            let mut with_status = created;
            with_status.status.phase = phase;
            runs.replace_status(&with_status).await.unwrap();
        }
        assert_eq!(
            running_runs_for_instance(&store, "team", "alice").await.unwrap(),
            2
        );
    }
}
