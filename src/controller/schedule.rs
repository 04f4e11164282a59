//! Cron-driven run generator.
//!
//! The next fire time is always derived from the last fire (or creation)
//! time, so a missed slot fires as soon as it is allowed to. After firing,
//! the displayed next time is recomputed from now so drift never compounds.

use super::cron;
use super::runtime::{Action, Reconciler};
use super::update_status;
use crate::config::Config;
use crate::error::Result;
use crate::resources::{
    AgentInstance, AgentRun, AgentRunSpec, AgentSchedule, ConcurrencyPolicy, LABEL_INSTANCE,
    LABEL_SCHEDULE, LABEL_SCHEDULE_TYPE, MEMORY_KEY, Object, ObjectMetaExt, SchedulePhase,
    ScheduleStatus, memory_config_map_name, object_meta,
};
use crate::store::{Api, Propagation, ResourceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use std::sync::Arc;
use std::time::Duration;
use k8s_openapi::Resource as _;

pub struct ScheduleReconciler {
    store: Arc<dyn ResourceStore>,
    config: Arc<Config>,
}

#[async_trait]
impl Reconciler for ScheduleReconciler {
    type K = AgentSchedule;

    fn owned_kinds(&self) -> &'static [&'static str] {
        &[AgentRun::KIND]
    }

    async fn reconcile(&self, schedule: Arc<AgentSchedule>) -> Result<Action> {
        self.reconcile_at(&schedule, Utc::now()).await
    }
}

impl ScheduleReconciler {
    pub fn new(store: Arc<dyn ResourceStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(Arc::clone(&self.store), namespace)
    }

    pub(crate) async fn reconcile_at(
        &self,
        schedule: &AgentSchedule,
        now: DateTime<Utc>,
    ) -> Result<Action> {
        let schedules: Api<AgentSchedule> = self.api(schedule.namespace());
        let controller = &self.config.controller;
        let spec = &schedule.spec;

        if spec.suspend {
            set_status(&schedules, schedule, |status| {
                status.phase = Some(SchedulePhase::Suspended);
                status.message = None;
            })
            .await?;
            return Ok(Action::Requeue(controller.idle_recheck()));
        }

        if let Err(e) = cron::parse_schedule(&spec.schedule) {
            tracing::warn!(schedule = schedule.name(), error = %e, "Invalid cron expression");
            set_status(&schedules, schedule, |status| {
                status.phase = Some(SchedulePhase::Error);
                status.message = Some(e.to_string());
                status.next_run_time = None;
            })
            .await?;
            return Ok(Action::AwaitChange);
        }

        let instances: Api<AgentInstance> = self.api(schedule.namespace());
        let Some(instance) = instances.get_opt(&spec.instance_ref).await? else {
            let message = format!("instance {} not found", spec.instance_ref);
            tracing::warn!(
                schedule = schedule.name(),
                instance = %spec.instance_ref,
                "Schedule instance missing"
            );
            set_status(&schedules, schedule, |status| {
                status.phase = Some(SchedulePhase::Error);
                status.message = Some(message.clone());
            })
            .await?;
            return Ok(Action::Requeue(controller.idle_recheck()));
        };

        let base = schedule
            .status
            .last_run_time
            .or_else(|| schedule.metadata.creation_timestamp.as_ref().map(|t| t.0))
            .unwrap_or(now);
        let next = cron::next_run_for(&spec.schedule, base)?;

        if now < next {
            set_status(&schedules, schedule, |status| {
                status.phase = Some(SchedulePhase::Active);
                status.next_run_time = Some(next);
                status.message = None;
            })
            .await?;
            return Ok(Action::Requeue(self.until(next, now)));
        }

        let runs: Api<AgentRun> = self.api(schedule.namespace());
        let previous = match &schedule.status.last_run_name {
            Some(name) => runs.get_opt(name).await?,
            None => None,
        };
        let previous_active = previous
            .as_ref()
            .filter(|run| run.status.phase.is_active() && !run.metadata.is_deleting());

        if let Some(previous) = previous_active {
            match spec.concurrency_policy {
                ConcurrencyPolicy::Forbid => {
                    let upcoming = cron::next_run_for(&spec.schedule, now)?;
                    tracing::info!(
                        schedule = schedule.name(),
                        previous = previous.name(),
                        "Skipping fire, previous run still active"
                    );
                    set_status(&schedules, schedule, |status| {
                        status.phase = Some(SchedulePhase::Active);
                        status.next_run_time = Some(upcoming);
                        status.message =
                            Some(format!("previous run {} still active", previous.name()));
                    })
                    .await?;
                    return Ok(Action::Requeue(controller.forbid_recheck()));
                }
                ConcurrencyPolicy::Replace => {
                    tracing::info!(
                        schedule = schedule.name(),
                        previous = previous.name(),
                        "Replacing active run"
                    );
                    runs.delete(previous.name(), Propagation::Background).await?;
                }
                ConcurrencyPolicy::Allow => {}
            }
        }

        let run = self.build_run(schedule, &instance, now).await?;
        let created = match runs.create(&run).await {
            Ok(created) => created,
            Err(e) if e.is_already_exists() => runs.get(run.name()).await?,
            Err(e) => return Err(e.into()),
        };

        let upcoming = cron::next_run_for(&spec.schedule, now)?;
        let run_name = created.name().to_string();
        let updated = update_status(&schedules, schedule, |schedule| {
            let status = &mut schedule.status;
            if status.last_run_name.as_deref() == Some(run_name.as_str()) {
                return false;
            }
            status.phase = Some(SchedulePhase::Active);
            status.last_run_time = Some(now);
            status.last_run_name = Some(run_name.clone());
            status.total_runs = status.total_runs.saturating_add(1);
            status.next_run_time = Some(upcoming);
            status.message = None;
            true
        })
        .await?;

        tracing::info!(
            schedule = schedule.name(),
            namespace = schedule.namespace(),
            run = %run_name,
            total_runs = updated.status.total_runs,
            "Schedule fired"
        );
        Ok(Action::Requeue(self.until(upcoming, now)))
    }

    fn until(&self, next: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let cap = self.config.controller.schedule_max_recheck();
        next.signed_duration_since(now)
            .to_std()
            .map_or(Duration::ZERO, |delay| delay.min(cap))
            .max(Duration::from_secs(1))
    }

    async fn build_run(
        &self,
        schedule: &AgentSchedule,
        instance: &AgentInstance,
        now: DateTime<Utc>,
    ) -> Result<AgentRun> {
        let spec = &schedule.spec;
        let task = if spec.include_memory {
            match self.read_memory(schedule.namespace(), &spec.instance_ref).await? {
                Some(memory) => with_memory(&memory, &spec.task),
                None => spec.task.clone(),
            }
        } else {
            spec.task.clone()
        };

        let name = format!("{}-{}", schedule.name(), now.timestamp());
        let mut metadata = object_meta(schedule.namespace(), &name)
            .with_label(LABEL_INSTANCE, &spec.instance_ref)
            .with_label(LABEL_SCHEDULE, schedule.name())
            .with_label(LABEL_SCHEDULE_TYPE, &spec.schedule_type);
        metadata.owner_references = Some(vec![schedule.controller_owner_ref()]);

        Ok(AgentRun {
            metadata,
            spec: AgentRunSpec {
                instance_ref: spec.instance_ref.clone(),
                agent_id: instance.name().to_string(),
                session_key: format!("schedule:{}", schedule.name()),
                task,
                model: instance.spec.model.clone(),
                skills: instance.spec.skills.clone(),
                ..AgentRunSpec::default()
            },
            ..AgentRun::default()
        })
    }

    /// Current memory text, read fresh on every fire.
    async fn read_memory(&self, namespace: &str, instance: &str) -> Result<Option<String>> {
        let config_maps: Api<ConfigMap> = self.api(namespace);
        let memory = config_maps
            .get_opt(&memory_config_map_name(instance))
            .await?
            .and_then(|cm| cm.data?.remove(MEMORY_KEY))
            .filter(|text| !text.trim().is_empty());
        Ok(memory)
    }
}

fn with_memory(memory: &str, task: &str) -> String {
    format!("## Memory\n\n{}\n\n## Task\n\n{task}", memory.trim())
}

/// Writes the status only when `apply` changes it.
async fn set_status(
    schedules: &Api<AgentSchedule>,
    schedule: &AgentSchedule,
    apply: impl Fn(&mut ScheduleStatus),
) -> Result<()> {
    update_status(schedules, schedule, |schedule| {
        let before = schedule.status.clone();
        apply(&mut schedule.status);
        schedule.status != before
    })
    .await?;
    Ok(())
}
