#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use agentplane::config::Config;
use agentplane::controller;
use agentplane::resources::{
    AgentInstance, AgentPolicy, AgentRun, InstanceSpec, LABEL_JOB_NAME, MemorySpec, Object,
    ObjectMetaExt, PolicySpec, object_meta,
};
use agentplane::store::{Api, LogSource, MemoryStore, ResourceStore};
use agentplane::workload::AGENT_CONTAINER;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "team";
pub const INSTANCE: &str = "alice";
pub const POLICY: &str = "strict";

/// In-process stand-in for the platform: a store plus the bits of kubelet
/// behavior the controllers observe.
pub struct Cluster {
    pub memory: Arc<MemoryStore>,
    pub store: Arc<dyn ResourceStore>,
}

impl Cluster {
    pub fn new() -> Self {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn ResourceStore> = memory.clone();
        Self { memory, store }
    }

    pub fn api<K: Object>(&self) -> Api<K> {
        Api::namespaced(Arc::clone(&self.store), NAMESPACE)
    }

    /// Instance `alice`, bound to policy `strict` when one is given.
    pub async fn seed_tenant(&self, policy: Option<PolicySpec>, memory_enabled: bool) {
        if let Some(spec) = &policy {
            self.api::<AgentPolicy>()
                .create(&AgentPolicy {
                    metadata: object_meta(NAMESPACE, POLICY),
                    spec: spec.clone(),
                })
                .await
                .unwrap();
        }
        self.api::<AgentInstance>()
            .create(&AgentInstance {
                metadata: object_meta(NAMESPACE, INSTANCE),
                spec: InstanceSpec {
                    policy_ref: policy.map(|_| POLICY.to_string()),
                    memory: Some(MemorySpec {
                        enabled: memory_enabled,
                    }),
                    ..InstanceSpec::default()
                },
            })
            .await
            .unwrap();
    }

    pub async fn create_run(&self, name: &str, tweak: impl FnOnce(&mut AgentRun)) -> AgentRun {
        let mut run = AgentRun::default();
        run.metadata = object_meta(NAMESPACE, name);
        run.spec.instance_ref = INSTANCE.into();
        run.spec.task = format!("task for {name}");
        tweak(&mut run);
        self.api::<AgentRun>().create(&run).await.unwrap()
    }

    /// Runs both reconcilers in the background with a fast recheck.
    pub fn start_controllers(&self) -> Controllers {
        let mut config = Config::default();
        config.controller.run_recheck_secs = 1;
        config.controller.error_backoff_secs = 1;
        let shutdown = CancellationToken::new();
        let logs: Arc<dyn LogSource> = self.memory.clone();
        let handle = tokio::spawn(controller::run_all(
            Arc::new(config),
            Arc::clone(&self.store),
            logs,
            shutdown.clone(),
        ));
        Controllers { shutdown, handle }
    }

    /// Plays the platform finishing a job: pod with the agent's exit code and
    /// log, then the job's terminal status.
    pub async fn finish_job(&self, job_name: &str, exit_code: i32, log: &str) {
        let pod_name = format!("{job_name}-x7k2p");
        self.memory
            .put_logs(NAMESPACE, &pod_name, AGENT_CONTAINER, log)
            .await;
        self.api::<Pod>()
            .create(&Pod {
                metadata: object_meta(NAMESPACE, &pod_name).with_label(LABEL_JOB_NAME, job_name),
                status: Some(PodStatus {
                    phase: Some(if exit_code == 0 { "Succeeded" } else { "Failed" }.into()),
                    container_statuses: Some(vec![ContainerStatus {
                        name: AGENT_CONTAINER.into(),
                        state: Some(ContainerState {
                            terminated: Some(ContainerStateTerminated {
                                exit_code,
                                ..ContainerStateTerminated::default()
                            }),
                            ..ContainerState::default()
                        }),
                        ..ContainerStatus::default()
                    }]),
                    ..PodStatus::default()
                }),
                ..Pod::default()
            })
            .await
            .unwrap();

        let jobs = self.api::<Job>();
        let mut job = jobs.get(job_name).await.unwrap();
        let status = job.status.get_or_insert_with(JobStatus::default);
        if exit_code == 0 {
            status.succeeded = Some(1);
        } else {
            status.failed = Some(1);
        }
        jobs.replace_status(&job).await.unwrap();
    }

    /// Polls until `pred` holds for the named run.
    pub async fn wait_for_run(&self, name: &str, pred: impl Fn(&AgentRun) -> bool) -> AgentRun {
        let runs = self.api::<AgentRun>();
        for _ in 0..500 {
            if let Some(run) = runs.get_opt(name).await.unwrap()
                && pred(&run)
            {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("run {name} never reached the expected state");
    }

    /// Polls until the named run is gone from the store.
    pub async fn wait_for_run_gone(&self, name: &str) {
        let runs = self.api::<AgentRun>();
        for _ in 0..500 {
            if runs.get_opt(name).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("run {name} was never deleted");
    }
}

pub struct Controllers {
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Controllers {
    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
