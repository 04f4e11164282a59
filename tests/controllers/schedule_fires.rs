use std::time::Duration;

use super::cluster::{Cluster, INSTANCE, NAMESPACE};
use agentplane::resources::{
    AgentRun, AgentSchedule, LABEL_SCHEDULE, Object, RunPhase, SchedulePhase, ScheduleSpec,
    object_meta,
};
use agentplane::store::{LabelSelector, Propagation};

async fn scheduled_runs(cluster: &Cluster) -> Vec<AgentRun> {
    cluster
        .api::<AgentRun>()
        .list(&LabelSelector::label(LABEL_SCHEDULE, "ticker"))
        .await
        .unwrap()
}

async fn create_ticker(cluster: &Cluster) {
    cluster
        .api::<AgentSchedule>()
        .create(&AgentSchedule {
            metadata: object_meta(NAMESPACE, "ticker"),
            spec: ScheduleSpec {
                instance_ref: INSTANCE.into(),
                // Seconds-first form: every second.
                schedule: "* * * * * *".into(),
                task: "tick".into(),
                schedule_type: "scheduled".into(),
                ..ScheduleSpec::default()
            },
            ..AgentSchedule::default()
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn forbid_holds_fires_until_previous_run_finishes() {
    let cluster = Cluster::new();
    cluster.seed_tenant(None, false).await;
    let controllers = cluster.start_controllers();
    create_ticker(&cluster).await;

    let mut first = None;
    for _ in 0..250 {
        if let Some(run) = scheduled_runs(&cluster).await.into_iter().next() {
            first = Some(run.name().to_string());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let first = first.expect("schedule never fired");
    let running = cluster
        .wait_for_run(&first, |run| run.status.phase == RunPhase::Running)
        .await;

    // Several slots pass while the first run is still active.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(scheduled_runs(&cluster).await.len(), 1);
    let schedule = cluster.api::<AgentSchedule>().get("ticker").await.unwrap();
    assert_eq!(schedule.status.total_runs, 1);
    assert_eq!(schedule.status.phase, Some(SchedulePhase::Active));

    cluster
        .finish_job(running.status.job_name.as_deref().unwrap(), 0, "")
        .await;
    cluster
        .wait_for_run(&first, |run| run.status.phase == RunPhase::Succeeded)
        .await;

    let mut total = 0;
    for _ in 0..250 {
        total = cluster
            .api::<AgentSchedule>()
            .get("ticker")
            .await
            .unwrap()
            .status
            .total_runs;
        if total >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(total >= 2, "schedule did not fire after the previous run finished");

    controllers.stop().await;
}

#[tokio::test]
async fn deleting_a_schedule_cascades_to_its_runs() {
    let cluster = Cluster::new();
    cluster.seed_tenant(None, false).await;
    let controllers = cluster.start_controllers();
    create_ticker(&cluster).await;

    let mut name = None;
    for _ in 0..250 {
        if let Some(run) = scheduled_runs(&cluster).await.into_iter().next() {
            name = Some(run.name().to_string());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let name = name.expect("schedule never fired");
    cluster
        .wait_for_run(&name, |run| run.status.phase == RunPhase::Running)
        .await;

    cluster
        .api::<AgentSchedule>()
        .delete("ticker", Propagation::Background)
        .await
        .unwrap();
    cluster.wait_for_run_gone(&name).await;

    controllers.stop().await;
}
