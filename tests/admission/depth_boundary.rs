use super::cluster::Cluster;
use agentplane::resources::{AgentRun, ParentRef, PolicySpec, RunPhase, SubagentPolicy, object_meta};
use agentplane::webhook::Admission;

fn depth_limited(max_depth: u32) -> PolicySpec {
    PolicySpec {
        subagent_policy: Some(SubagentPolicy {
            max_depth,
            max_concurrent: 0,
        }),
        ..PolicySpec::default()
    }
}

fn parent(spawn_depth: u32) -> Option<ParentRef> {
    Some(ParentRef {
        run_name: "root".into(),
        session_key: "s".into(),
        spawn_depth,
    })
}

#[tokio::test]
async fn depth_equal_to_max_is_denied_at_admission_but_passes_reconcile() {
    let cluster = Cluster::new();
    cluster.seed_tenant(Some(depth_limited(3)), false).await;
    let admission = Admission::new(cluster.store.clone());

    let mut candidate = AgentRun::default();
    candidate.metadata = object_meta("team", "child");
    candidate.spec.instance_ref = "alice".into();
    candidate.spec.task = "t".into();
    candidate.spec.parent = parent(3);
    let violation = admission.admit(&candidate).await.unwrap_err();
    assert!(violation.reason.contains("depth 3"));

    let mut below = candidate.clone();
    below.spec.parent = parent(2);
    assert!(admission.admit(&below).await.is_ok());

    // Written past admission, the reconciler's own check is one step looser.
    let controllers = cluster.start_controllers();
    cluster.create_run("at-max", |run| run.spec.parent = parent(3)).await;
    cluster.create_run("over-max", |run| run.spec.parent = parent(4)).await;

    let at_max = cluster
        .wait_for_run("at-max", |run| run.status.phase == RunPhase::Running)
        .await;
    assert!(at_max.status.error.is_none());

    let over_max = cluster
        .wait_for_run("over-max", |run| run.status.phase == RunPhase::Failed)
        .await;
    assert!(over_max.status.error.unwrap().contains("exceeds"));

    controllers.stop().await;
}

#[tokio::test]
async fn concurrency_limit_fails_extra_runs() {
    let cluster = Cluster::new();
    cluster
        .seed_tenant(
            Some(PolicySpec {
                subagent_policy: Some(SubagentPolicy {
                    max_depth: 0,
                    max_concurrent: 1,
                }),
                ..PolicySpec::default()
            }),
            false,
        )
        .await;
    let controllers = cluster.start_controllers();

    cluster.create_run("first", |_| {}).await;
    cluster
        .wait_for_run("first", |run| run.status.phase == RunPhase::Running)
        .await;

    cluster.create_run("second", |_| {}).await;
    let second = cluster
        .wait_for_run("second", |run| run.status.phase == RunPhase::Failed)
        .await;
    assert!(second.status.error.unwrap().contains("max concurrent 1"));

    controllers.stop().await;
}
