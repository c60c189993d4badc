//! Backlog recovery: re-arming runs stuck in awaiting-judge.

use serde_json::json;

use armitage::judge::recovery::recover_backlog;
use armitage::store::NewArtifact;
use armitage::types::{ArtifactKind, BlockReason, RunStatus, TaskStatus};

use crate::util::{open_temp_store, seed_pr_candidate, test_config};

#[tokio::test]
async fn crashed_judge_run_is_rearmed_after_cooldown() {
    let (store, _dir) = open_temp_store().await;
    let (task_id, run_id) = seed_pr_candidate(&store, 9, "Stuck change").await;

    // Judge A claimed the run and crashed before finishing.
    assert!(store.claim_run(&run_id).await.expect("claim"));
    let run = store.get_run(&run_id).await.expect("run");
    assert!(run.judged_at.is_some());

    // Judge B recovers (cooldown is zero in the test config).
    let config = test_config();
    let recovered = recover_backlog(&store, &config, &[]).await.expect("recover");
    assert_eq!(recovered, 1);

    let run = store.get_run(&run_id).await.expect("run");
    assert!(run.judged_at.is_none());

    let events = store.events_for_entity("task", &task_id).await.expect("events");
    assert!(events.iter().any(|e| e.kind == "judge.task_recovered"));

    // The run is claimable again, exactly once.
    assert!(store.claim_run(&run_id).await.expect("claim"));
    assert!(!store.claim_run(&run_id).await.expect("claim"));
}

#[tokio::test]
async fn recovery_skips_tasks_with_a_pending_run() {
    let (store, _dir) = open_temp_store().await;
    let (_task_id, run_id) = seed_pr_candidate(&store, 10, "Half judged").await;

    // The run is still pending judgement; the normal scan owns it.
    let config = test_config();
    let recovered = recover_backlog(&store, &config, &[]).await.expect("recover");
    assert_eq!(recovered, 0);

    let run = store.get_run(&run_id).await.expect("run");
    assert!(run.judged_at.is_none());
}

#[tokio::test]
async fn recovery_ignores_tasks_without_judgeable_artifacts() {
    let (store, _dir) = open_temp_store().await;

    let task_id = store
        .create_task(&armitage::store::NewTask {
            title: "No artifact".to_owned(),
            goal: "g".to_owned(),
            ..armitage::store::NewTask::default()
        })
        .await
        .expect("task");
    store
        .set_task_status(&task_id, TaskStatus::Blocked, Some(BlockReason::AwaitingJudge))
        .await
        .expect("block");
    let run_id = store
        .insert_run(&task_id, RunStatus::Success, &armitage::store::now_rfc3339())
        .await
        .expect("run");
    store
        .insert_artifact(&NewArtifact {
            run_id: run_id.clone(),
            kind: ArtifactKind::Other("log_bundle".to_owned()),
            reference: "bundle-1".to_owned(),
            url: None,
            metadata: json!({}),
        })
        .await
        .expect("artifact");
    assert!(store.claim_run(&run_id).await.expect("claim"));

    let config = test_config();
    let recovered = recover_backlog(&store, &config, &[]).await.expect("recover");
    assert_eq!(recovered, 0);

    // With the plugin kind registered, the same run becomes recoverable.
    let recovered = recover_backlog(&store, &config, &["log_bundle".to_owned()])
        .await
        .expect("recover");
    assert_eq!(recovered, 1);
}
