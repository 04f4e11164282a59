//! The run state machine: Pending → Running → Succeeded | Failed.
//!
//! Each pass re-reads everything it acts on. Expected failures (policy,
//! missing workload, workload failure, timeout) end as a terminal status
//! write; only unexpected store errors bubble up to the runtime's backoff.

use super::extraction::{self, Extracted};
use super::runtime::{Action, Reconciler};
use super::{update_object, update_status};
use crate::config::Config;
use crate::error::{Error, Result, StoreError};
use crate::policy::{self, PolicyBinding};
use crate::resources::{
    AgentInstance, AgentRun, AgentRunStatus, CleanupPolicy, LABEL_INSTANCE, LABEL_JOB_NAME,
    MEMORY_KEY, Object, ObjectMetaExt, RUN_FINALIZER, RunPhase, memory_config_map_name,
    object_meta,
};
use crate::store::{Api, DeleteOutcome, LabelSelector, LogSource, Propagation, ResourceStore};
use crate::workload::{self, AGENT_CONTAINER, BuildContext};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, ServiceAccount};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const REASON_WORKLOAD_NOT_FOUND: &str = "workload not found";
pub const REASON_WORKLOAD_FAILED: &str = "workload failed";
pub const REASON_TIMEOUT: &str = "timeout";

pub struct AgentRunReconciler {
    store: Arc<dyn ResourceStore>,
    logs: Arc<dyn LogSource>,
    config: Arc<Config>,
}

#[async_trait]
impl Reconciler for AgentRunReconciler {
    type K = AgentRun;

    fn owned_kinds(&self) -> &'static [&'static str] {
        &[<Job as k8s_openapi::Resource>::KIND]
    }

    async fn reconcile(&self, run: Arc<AgentRun>) -> Result<Action> {
        let runs: Api<AgentRun> = Api::namespaced(Arc::clone(&self.store), run.namespace());

        if run.metadata.is_deleting() {
            return self.finalize(&runs, &run).await;
        }

        match run.status.phase {
            RunPhase::Pending => {
                let run = self.track(&runs, &run).await?;
                self.start(&runs, &run).await
            }
            RunPhase::Running => {
                let run = self.track(&runs, &run).await?;
                self.observe(&runs, &run).await
            }
            RunPhase::Succeeded | RunPhase::Failed => self.settle(&runs, &run).await,
        }
    }
}

impl AgentRunReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        logs: Arc<dyn LogSource>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            logs,
            config,
        }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(Arc::clone(&self.store), namespace)
    }

    /// Adds the cleanup finalizer and the instance label before any side effect.
    async fn track(&self, runs: &Api<AgentRun>, run: &AgentRun) -> Result<AgentRun> {
        let instance = run.spec.instance_ref.clone();
        let updated = update_object(runs, run, |run| {
            let added = run.metadata.add_finalizer(RUN_FINALIZER);
            let labelled = run.metadata.label(LABEL_INSTANCE) != Some(instance.as_str());
            if labelled {
                run.metadata
                    .labels_mut()
                    .insert(LABEL_INSTANCE.into(), instance.clone());
            }
            added || labelled
        })
        .await?;
        Ok(updated)
    }

    async fn start(&self, runs: &Api<AgentRun>, run: &AgentRun) -> Result<Action> {
        let namespace = run.namespace();

        if let Err(reason) = run.spec.timeout_duration() {
            return self
                .fail(runs, run, format!("invalid timeout: {reason}"), None)
                .await;
        }

        let binding =
            policy::resolve_binding(&self.store, namespace, &run.spec.instance_ref).await?;
        let running =
            policy::running_runs_for_instance(&self.store, namespace, &run.spec.instance_ref)
                .await?;
        if let Err(violation) = policy::reconcile_verdict(run, binding.policy_spec(), running) {
            tracing::info!(
                run = run.name(),
                namespace,
                reason = %violation,
                "Run rejected by policy"
            );
            return self.fail(runs, run, violation.reason, None).await;
        }

        self.ensure_service_account(namespace).await?;
        self.ensure_input(run).await?;
        let job_name = self.ensure_job(run, &binding).await?;

        let started = update_status(runs, run, |run| {
            if !run.status.phase.can_advance_to(RunPhase::Running) {
                return false;
            }
            run.status.phase = RunPhase::Running;
            run.status.job_name.get_or_insert_with(|| job_name.clone());
            run.status.started_at.get_or_insert_with(Utc::now);
            true
        })
        .await?;

        tracing::info!(
            run = started.name(),
            namespace,
            phase = %started.status.phase,
            job = %job_name,
            "Run started"
        );
        Ok(Action::Requeue(self.config.controller.run_recheck()))
    }

    async fn ensure_service_account(&self, namespace: &str) -> Result<()> {
        let accounts: Api<ServiceAccount> = self.api(namespace);
        let name = &self.config.workload.service_account;
        if accounts.get_opt(name).await?.is_some() {
            return Ok(());
        }
        let account = ServiceAccount {
            metadata: object_meta(namespace, name),
            ..ServiceAccount::default()
        };
        tolerate_existing(accounts.create(&account).await)?;
        tracing::debug!(namespace, account = %name, "Created execution identity");
        Ok(())
    }

    async fn ensure_input(&self, run: &AgentRun) -> Result<()> {
        let config_maps: Api<ConfigMap> = self.api(run.namespace());
        tolerate_existing(
            config_maps
                .create(&workload::build_input_config_map(run))
                .await,
        )?;
        Ok(())
    }

    async fn ensure_job(&self, run: &AgentRun, binding: &PolicyBinding) -> Result<String> {
        let jobs: Api<Job> = self.api(run.namespace());
        let name = run
            .status
            .job_name
            .clone()
            .unwrap_or_else(|| workload::job_name(run));
        if jobs.get_opt(&name).await?.is_some() {
            return Ok(name);
        }

        let ctx = BuildContext {
            config: &self.config.workload,
            policy: binding.policy_spec(),
            memory_enabled: binding
                .instance
                .as_ref()
                .is_some_and(AgentInstance::memory_enabled),
        };
        let job = workload::build_job(run, &ctx)
            .map_err(|e| Error::Workload(format!("job for {}: {e}", run.name())))?;
        tolerate_existing(jobs.create(&job).await)?;
        Ok(name)
    }

    async fn observe(&self, runs: &Api<AgentRun>, run: &AgentRun) -> Result<Action> {
        let namespace = run.namespace();
        let job_name = run
            .status
            .job_name
            .clone()
            .unwrap_or_else(|| workload::job_name(run));

        let jobs: Api<Job> = self.api(namespace);
        let Some(job) = jobs.get_opt(&job_name).await? else {
            return self
                .fail(runs, run, REASON_WORKLOAD_NOT_FOUND.to_string(), None)
                .await;
        };

        let pod = self.find_pod(namespace, &job_name).await?;
        let pod_name = run
            .status
            .pod_name
            .clone()
            .or_else(|| pod.as_ref().map(|pod| pod.name().to_string()));

        let exit_code = pod
            .as_ref()
            .and_then(|pod| workload::container_exit_code(pod, AGENT_CONTAINER));

        let status = job.status.unwrap_or_default();
        if status.succeeded.unwrap_or(0) > 0 {
            return self.succeed(runs, run, pod_name, exit_code).await;
        }

        if status.failed.unwrap_or(0) > 0 {
            let run = self.record_pod(runs, run, pod_name).await?;
            return self
                .fail(runs, &run, REASON_WORKLOAD_FAILED.to_string(), exit_code)
                .await;
        }

        if self.timed_out(run) {
            tracing::warn!(
                run = run.name(),
                namespace,
                job = %job_name,
                "Run exceeded its timeout"
            );
            jobs.delete(&job_name, Propagation::Background).await?;
            let run = self.record_pod(runs, run, pod_name).await?;
            return self
                .fail(runs, &run, REASON_TIMEOUT.to_string(), None)
                .await;
        }

        self.record_pod(runs, run, pod_name).await?;
        Ok(Action::Requeue(self.config.controller.run_recheck()))
    }

    /// Writes the pod name once it is known. No write when nothing changed.
    async fn record_pod(
        &self,
        runs: &Api<AgentRun>,
        run: &AgentRun,
        pod_name: Option<String>,
    ) -> Result<AgentRun> {
        let Some(pod_name) = pod_name else {
            return Ok(run.clone());
        };
        let updated = update_status(runs, run, |run| {
            if run.status.pod_name.is_some() || run.status.phase.is_terminal() {
                return false;
            }
            run.status.pod_name = Some(pod_name.clone());
            true
        })
        .await?;
        Ok(updated)
    }

    async fn find_pod(&self, namespace: &str, job_name: &str) -> Result<Option<Pod>> {
        let pods: Api<Pod> = self.api(namespace);
        let mut found = pods
            .list(&LabelSelector::label(LABEL_JOB_NAME, job_name))
            .await?;
        // Newest first; a job with no retries has at most one pod.
        found.sort_by_key(|pod| {
            std::cmp::Reverse(pod.metadata.creation_timestamp.as_ref().map(|t| t.0))
        });
        Ok(found.into_iter().next())
    }

    fn timed_out(&self, run: &AgentRun) -> bool {
        let (Ok(Some(timeout)), Some(started)) =
            (run.spec.timeout_duration(), run.status.started_at)
        else {
            return false;
        };
        let elapsed = Utc::now().signed_duration_since(started);
        elapsed.to_std().is_ok_and(|elapsed| elapsed > timeout)
    }

    async fn succeed(
        &self,
        runs: &Api<AgentRun>,
        run: &AgentRun,
        pod_name: Option<String>,
        exit_code: Option<i32>,
    ) -> Result<Action> {
        let extracted = match &pod_name {
            Some(pod) => self.read_side_channel(run, pod).await,
            None => {
                tracing::warn!(run = run.name(), "Workload succeeded but no pod was found");
                Extracted::default()
            }
        };

        if let Some(memory) = &extracted.memory
            && let Err(e) = self.write_memory(run, memory).await
        {
            tracing::warn!(run = run.name(), error = %e, "Failed to persist instance memory");
        }

        let result = extracted.result.clone();
        let updated = update_status(runs, run, |run| {
            if !run.status.phase.can_advance_to(RunPhase::Succeeded) {
                return false;
            }
            run.status = AgentRunStatus {
                phase: RunPhase::Succeeded,
                pod_name: run.status.pod_name.clone().or_else(|| pod_name.clone()),
                completed_at: Some(Utc::now()),
                result: result.clone(),
                error: None,
                exit_code: exit_code.or(run.status.exit_code),
                ..run.status.clone()
            };
            true
        })
        .await?;

        tracing::info!(
            run = updated.name(),
            namespace = updated.namespace(),
            phase = %updated.status.phase,
            captured = updated.status.result.is_some(),
            "Run succeeded"
        );
        self.settle(runs, &updated).await
    }

    /// Reads the agent's log tail before the workload is garbage collected.
    async fn read_side_channel(&self, run: &AgentRun, pod: &str) -> Extracted {
        match self
            .logs
            .tail(
                run.namespace(),
                pod,
                AGENT_CONTAINER,
                self.config.controller.log_tail_lines,
            )
            .await
        {
            Ok(text) => extraction::extract(&text),
            Err(e) => {
                tracing::warn!(run = run.name(), pod, error = %e, "Could not read agent logs");
                Extracted::default()
            }
        }
    }

    /// Overwrites the instance's single memory entry.
    async fn write_memory(&self, run: &AgentRun, memory: &str) -> Result<()> {
        let config_maps: Api<ConfigMap> = self.api(run.namespace());
        let name = memory_config_map_name(&run.spec.instance_ref);

        match config_maps.get_opt(&name).await? {
            Some(existing) => {
                update_object(&config_maps, &existing, |cm| {
                    let data = cm.data.get_or_insert_with(BTreeMap::new);
                    if data.get(MEMORY_KEY).map(String::as_str) == Some(memory) {
                        return false;
                    }
                    data.insert(MEMORY_KEY.into(), memory.to_string());
                    true
                })
                .await?;
            }
            None => {
                let cm = ConfigMap {
                    metadata: object_meta(run.namespace(), &name)
                        .with_label(LABEL_INSTANCE, &run.spec.instance_ref),
                    data: Some(BTreeMap::from([(MEMORY_KEY.to_string(), memory.to_string())])),
                    ..ConfigMap::default()
                };
                tolerate_existing(config_maps.create(&cm).await)?;
            }
        }
        tracing::debug!(run = run.name(), config_map = %name, "Instance memory updated");
        Ok(())
    }

    async fn fail(
        &self,
        runs: &Api<AgentRun>,
        run: &AgentRun,
        reason: String,
        exit_code: Option<i32>,
    ) -> Result<Action> {
        let updated = update_status(runs, run, |run| {
            if !run.status.phase.can_advance_to(RunPhase::Failed) || run.status.phase.is_terminal()
            {
                return false;
            }
            run.status.phase = RunPhase::Failed;
            run.status.error = Some(reason.clone());
            run.status.completed_at = Some(Utc::now());
            if exit_code.is_some() {
                run.status.exit_code = exit_code;
            }
            true
        })
        .await?;

        tracing::info!(
            run = updated.name(),
            namespace = updated.namespace(),
            phase = %updated.status.phase,
            reason = %reason,
            "Run failed"
        );
        self.settle(runs, &updated).await
    }

    /// Terminal runs: release the finalizer when the cleanup policy asks for it.
    async fn settle(&self, runs: &Api<AgentRun>, run: &AgentRun) -> Result<Action> {
        if run.spec.cleanup == CleanupPolicy::Delete && run.metadata.has_finalizer(RUN_FINALIZER) {
            update_object(runs, run, |run| run.metadata.remove_finalizer(RUN_FINALIZER)).await?;
            tracing::debug!(run = run.name(), "Cleanup finalizer released");
        }
        Ok(Action::AwaitChange)
    }

    /// Deletion path: tear down the workload, then let the run go.
    async fn finalize(&self, runs: &Api<AgentRun>, run: &AgentRun) -> Result<Action> {
        if !run.metadata.has_finalizer(RUN_FINALIZER) {
            return Ok(Action::AwaitChange);
        }

        let jobs: Api<Job> = self.api(run.namespace());
        let job_name = run
            .status
            .job_name
            .clone()
            .unwrap_or_else(|| workload::job_name(run));
        let outcome = jobs.delete(&job_name, Propagation::Background).await?;
        if outcome == DeleteOutcome::Finalizing {
            tracing::debug!(run = run.name(), job = %job_name, "Workload still finalizing");
        }

        match update_object(runs, run, |run| run.metadata.remove_finalizer(RUN_FINALIZER)).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(run = run.name(), namespace = run.namespace(), "Run finalized");
        Ok(Action::AwaitChange)
    }
}

fn tolerate_existing<T>(result: std::result::Result<T, StoreError>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(Error::from(e)),
    }
}
