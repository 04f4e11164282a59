use super::Admission;
use crate::policy::admission_verdict;
use crate::resources::Object;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};

impl Admission {
    /// Handles one validating review. First failing rule wins.
    pub async fn review_validate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> AdmissionResponse {
        let response = AdmissionResponse::from(request);
        let Some(run) = self.run_under_review(request) else {
            return response;
        };
        let run = match run {
            Ok(run) => run,
            Err(e) => return response.deny(format!("malformed AgentRun: {e}")),
        };

        let policy = self.policy_for(&run).await;
        match admission_verdict(&run, policy.as_ref()) {
            Ok(()) => response,
            Err(violation) => {
                tracing::info!(
                    uid = %request.uid,
                    run = run.name(),
                    namespace = run.namespace(),
                    reason = %violation.reason,
                    "Denied AgentRun"
                );
                response.deny(violation.reason)
            }
        }
    }
}
