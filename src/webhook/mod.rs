//! Admission webhook: validating and mutating handlers for AgentRun writes.
//!
//! Both handlers resolve Instance → Policy from the store on every request and
//! fail open when either (or the store itself) is unavailable.

mod mutating;
mod server;
mod validating;

pub use mutating::{Mutation, mutate};
pub use server::{router, run_webhook, run_webhook_with_listener};

use crate::error::PolicyViolation;
use crate::policy::{admission_verdict, resolve_binding};
use crate::resources::{AgentRun, Object, PolicySpec};
use crate::store::ResourceStore;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};
use std::sync::Arc;

/// Shared admission logic, independent of the HTTP surface.
#[derive(Clone)]
pub struct Admission {
    store: Arc<dyn ResourceStore>,
}

impl Admission {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Runs a write through the same pipeline the platform would: mutate,
    /// then validate the mutated object.
    pub async fn admit(&self, run: &AgentRun) -> Result<AgentRun, PolicyViolation> {
        let policy = self.policy_for(run).await;
        let mutated = match mutate(run, policy.as_ref()) {
            Ok(mutation) => mutation.run,
            Err(e) => {
                tracing::warn!(
                    run = run.name(),
                    error = %e,
                    "Mutation failed, validating as submitted"
                );
                run.clone()
            }
        };
        admission_verdict(&mutated, policy.as_ref())?;
        Ok(mutated)
    }

    /// Bound policy for `run`, or `None` when it cannot be resolved.
    async fn policy_for(&self, run: &AgentRun) -> Option<PolicySpec> {
        match resolve_binding(&self.store, run.namespace(), &run.spec.instance_ref).await {
            Ok(binding) => binding.policy.map(|policy| policy.spec),
            Err(e) => {
                tracing::warn!(
                    run = run.name(),
                    namespace = run.namespace(),
                    error = %e,
                    "Policy lookup failed, admitting without policy"
                );
                None
            }
        }
    }

    /// The AgentRun carried by a create/update review; `None` for anything
    /// the webhook does not act on.
    fn run_under_review(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Option<Result<AgentRun, serde_json::Error>> {
        if request.kind.kind != <AgentRun as k8s_openapi::Resource>::KIND
            || !matches!(request.operation, Operation::Create | Operation::Update)
        {
            return None;
        }
        let object = request.object.as_ref()?;
        let run = serde_json::to_value(object)
            .and_then(serde_json::from_value::<AgentRun>)
            .map(|mut run| {
                if run.namespace().is_empty() {
                    run.metadata.namespace.clone_from(&request.namespace);
                }
                run
            });
        Some(run)
    }
}
