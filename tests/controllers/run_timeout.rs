use super::cluster::Cluster;
use agentplane::resources::RunPhase;
use agentplane::store::LabelSelector;
use k8s_openapi::api::batch::v1::Job;

#[tokio::test]
async fn overdue_run_fails_and_loses_its_workload() {
    let cluster = Cluster::new();
    cluster.seed_tenant(None, false).await;
    let controllers = cluster.start_controllers();

    cluster
        .create_run("slow", |run| run.spec.timeout = Some("1s".into()))
        .await;
    let running = cluster
        .wait_for_run("slow", |run| run.status.phase == RunPhase::Running)
        .await;
    let job_name = running.status.job_name.unwrap();

    let failed = cluster
        .wait_for_run("slow", |run| run.status.phase == RunPhase::Failed)
        .await;
    assert_eq!(failed.status.error.as_deref(), Some("timeout"));
    assert!(failed.status.completed_at.is_some());
    assert!(cluster.api::<Job>().get_opt(&job_name).await.unwrap().is_none());

    controllers.stop().await;
}

#[tokio::test]
async fn unparseable_timeout_fails_before_any_workload() {
    let cluster = Cluster::new();
    cluster.seed_tenant(None, false).await;
    let controllers = cluster.start_controllers();

    cluster
        .create_run("typo", |run| run.spec.timeout = Some("ten minutes".into()))
        .await;
    let failed = cluster
        .wait_for_run("typo", |run| run.status.phase == RunPhase::Failed)
        .await;
    assert!(failed.status.error.unwrap().starts_with("invalid timeout"));
    assert!(failed.status.job_name.is_none());
    let jobs = cluster.api::<Job>().list(&LabelSelector::everything()).await.unwrap();
    assert!(jobs.is_empty());

    controllers.stop().await;
}
