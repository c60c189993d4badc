//! Pending-candidate scanner behavior.

use serde_json::json;

use armitage::judge::scanner::{pending_prs, pending_worktrees};
use armitage::store::{NewArtifact, NewTask};
use armitage::types::{ArtifactKind, BlockReason, RunStatus, TaskStatus};

use crate::util::{open_temp_store, seed_pr_candidate, test_config};

#[tokio::test]
async fn scanner_yields_each_task_once() {
    let (store, _dir) = open_temp_store().await;
    let (task_id, _run1) = seed_pr_candidate(&store, 11, "Two runs").await;

    // A second successful run of the same task with its own PR artifact.
    let run2 = store
        .insert_run(&task_id, RunStatus::Success, &armitage::store::now_rfc3339())
        .await
        .expect("run2");
    store
        .insert_artifact(&NewArtifact {
            run_id: run2,
            kind: ArtifactKind::Pr,
            reference: "11".to_owned(),
            url: None,
            metadata: json!({}),
        })
        .await
        .expect("artifact");

    let pending = pending_prs(&store).await.expect("scan");
    assert_eq!(pending.len(), 1, "same task must not be yielded twice");
    assert_eq!(pending[0].pr_number, 11);
}

#[tokio::test]
async fn scanner_skips_claimed_runs_and_unblocked_tasks() {
    let (store, _dir) = open_temp_store().await;
    let (task_a, run_a) = seed_pr_candidate(&store, 21, "Claimed").await;
    let (task_b, _run_b) = seed_pr_candidate(&store, 22, "Not blocked").await;

    store.claim_run(&run_a).await.expect("claim");
    store
        .set_task_status(&task_b, TaskStatus::Running, None)
        .await
        .expect("unblock");

    let pending = pending_prs(&store).await.expect("scan");
    assert!(pending.is_empty());

    // Re-arming the claimed run brings its task back.
    store.rearm_run(&run_a).await.expect("rearm");
    let pending = pending_prs(&store).await.expect("scan");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.id, task_a);
}

#[tokio::test]
async fn worktree_metadata_falls_back_to_config_defaults() {
    let (store, _dir) = open_temp_store().await;

    let task_id = store
        .create_task(&NewTask {
            title: "Local change".to_owned(),
            goal: "g".to_owned(),
            ..NewTask::default()
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
            run_id,
            kind: ArtifactKind::Worktree,
            reference: "/tmp/worktrees/wt-1".to_owned(),
            url: None,
            metadata: json!({ "branch_name": "feature/local" }),
        })
        .await
        .expect("artifact");

    let mut config = test_config();
    config.local_base_repo_path = Some("/srv/base-repo".into());
    config.local_base_branch = "develop".to_owned();

    let pending = pending_worktrees(&store, &config).await.expect("scan");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].branch_name, "feature/local");
    assert_eq!(pending[0].base_branch, "develop");
    assert_eq!(pending[0].base_repo_path, "/srv/base-repo");

    // Without a branch name the candidate is skipped entirely.
    let (store2, _dir2) = open_temp_store().await;
    let task2 = store2
        .create_task(&NewTask {
            title: "No branch".to_owned(),
            goal: "g".to_owned(),
            ..NewTask::default()
        })
        .await
        .expect("task");
    store2
        .set_task_status(&task2, TaskStatus::Blocked, Some(BlockReason::AwaitingJudge))
        .await
        .expect("block");
    let run2 = store2
        .insert_run(&task2, RunStatus::Success, &armitage::store::now_rfc3339())
        .await
        .expect("run");
    store2
        .insert_artifact(&NewArtifact {
            run_id: run2,
            kind: ArtifactKind::Worktree,
            reference: "/tmp/worktrees/wt-2".to_owned(),
            url: None,
            metadata: json!({}),
        })
        .await
        .expect("artifact");
    let pending = pending_worktrees(&store2, &config).await.expect("scan");
    assert!(pending.is_empty());
}
