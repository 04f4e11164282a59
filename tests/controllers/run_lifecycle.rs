use super::cluster::{Cluster, INSTANCE, NAMESPACE};
use agentplane::controller::extraction::{MEMORY_BEGIN, MEMORY_END, RESULT_BEGIN, RESULT_END};
use agentplane::resources::{
    AgentRun, CleanupPolicy, MEMORY_KEY, Object, ObjectMetaExt, RUN_FINALIZER, RunPhase,
    memory_config_map_name,
};
use agentplane::store::Propagation;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};

#[tokio::test]
async fn run_goes_from_pending_to_succeeded_with_captured_result() {
    let cluster = Cluster::new();
    cluster.seed_tenant(None, true).await;
    let controllers = cluster.start_controllers();

    cluster.create_run("report", |_| {}).await;
    let running = cluster
        .wait_for_run("report", |run| run.status.phase == RunPhase::Running)
        .await;
    let job_name = running.status.job_name.clone().unwrap();
    assert!(running.status.started_at.is_some());
    assert!(running.metadata.has_finalizer(RUN_FINALIZER));

    let job = cluster.api::<Job>().get(&job_name).await.unwrap();
    assert_eq!(job.metadata.controller_owner().unwrap().name, "report");
    assert!(cluster.api::<ConfigMap>().get("report-input").await.is_ok());
    let accounts = cluster.api::<ServiceAccount>();
    assert_eq!(accounts.list(&Default::default()).await.unwrap().len(), 1);

    let draft = r#"{"status":"draft","response":"early"}"#;
    let last = r#"{"status":"success","response":"all green"}"#;
    let log = format!(
        "starting\n{RESULT_BEGIN}\n{draft}\n{RESULT_END}\n\
         working\n{RESULT_BEGIN}\n{last}\n{RESULT_END}\n\
         {MEMORY_BEGIN}\nchecked the dashboards\n{MEMORY_END}\n"
    );
    cluster.finish_job(&job_name, 0, &log).await;

    let done = cluster
        .wait_for_run("report", |run| run.status.phase == RunPhase::Succeeded)
        .await;
    assert_eq!(done.status.result.as_deref(), Some("all green"));
    assert_eq!(done.status.exit_code, Some(0));
    assert!(done.status.completed_at.is_some());
    assert!(done.status.pod_name.is_some());

    let memory = cluster
        .api::<ConfigMap>()
        .get(&memory_config_map_name(INSTANCE))
        .await
        .unwrap();
    assert_eq!(memory.data.unwrap()[MEMORY_KEY], "checked the dashboards");

    controllers.stop().await;
}

#[tokio::test]
async fn failed_workload_is_terminal_with_exit_code() {
    let cluster = Cluster::new();
    cluster.seed_tenant(None, false).await;
    let controllers = cluster.start_controllers();

    cluster.create_run("broken", |_| {}).await;
    let running = cluster
        .wait_for_run("broken", |run| run.status.phase == RunPhase::Running)
        .await;
    cluster
        .finish_job(running.status.job_name.as_deref().unwrap(), 3, "panic: oh no\n")
        .await;

    let failed = cluster
        .wait_for_run("broken", |run| run.status.phase == RunPhase::Failed)
        .await;
    assert_eq!(failed.status.error.as_deref(), Some("workload failed"));
    assert_eq!(failed.status.exit_code, Some(3));
    assert!(failed.status.result.is_none());

    controllers.stop().await;
}

#[tokio::test]
async fn deleting_a_run_removes_its_workload() {
    let cluster = Cluster::new();
    cluster.seed_tenant(None, false).await;
    let controllers = cluster.start_controllers();

    cluster.create_run("doomed", |_| {}).await;
    let running = cluster
        .wait_for_run("doomed", |run| run.status.phase == RunPhase::Running)
        .await;
    let job_name = running.status.job_name.unwrap();

    cluster
        .api::<AgentRun>()
        .delete("doomed", Propagation::Background)
        .await
        .unwrap();
    cluster.wait_for_run_gone("doomed").await;
    assert!(cluster.api::<Job>().get_opt(&job_name).await.unwrap().is_none());

    controllers.stop().await;
}

#[tokio::test]
async fn delete_cleanup_releases_finalizer_after_completion() {
    let cluster = Cluster::new();
    cluster.seed_tenant(None, false).await;
    let controllers = cluster.start_controllers();

    cluster
        .create_run("ephemeral", |run| run.spec.cleanup = CleanupPolicy::Delete)
        .await;
    let running = cluster
        .wait_for_run("ephemeral", |run| run.status.phase == RunPhase::Running)
        .await;
    cluster
        .finish_job(running.status.job_name.as_deref().unwrap(), 0, "no markers\n")
        .await;

    let done = cluster
        .wait_for_run("ephemeral", |run| {
            run.status.phase == RunPhase::Succeeded && !run.metadata.has_finalizer(RUN_FINALIZER)
        })
        .await;
    assert!(done.status.result.is_none());
    assert_eq!(done.namespace(), NAMESPACE);

    controllers.stop().await;
}
