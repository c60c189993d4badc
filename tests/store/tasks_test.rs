//! Task table: retry accounting, title-prefix probes, staleness scan.

use armitage::store::NewTask;
use armitage::types::{BlockReason, RiskLevel, TaskStatus};

use crate::util::{open_temp_store, seed_task};

#[tokio::test]
async fn create_and_get_round_trips_typed_fields() {
    let (store, _dir) = open_temp_store().await;
    let id = store
        .create_task(&NewTask {
            title: "Build the thing".to_owned(),
            goal: "make it work".to_owned(),
            role: "worker".to_owned(),
            risk_level: RiskLevel::High,
            priority: 7,
            allowed_paths: vec!["src/**".to_owned()],
            denied_commands: vec!["rm -rf".to_owned()],
            verify_commands: vec!["cargo test".to_owned()],
            depends_on: vec!["t-0".to_owned()],
            timebox_minutes: Some(90),
            kind: "code".to_owned(),
            context: serde_json::json!({ "note": "hello" }),
        })
        .await
        .expect("create");

    let task = store.get_task(&id).await.expect("get");
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.block_reason, None);
    assert_eq!(task.risk_level, RiskLevel::High);
    assert_eq!(task.priority, 7);
    assert_eq!(task.allowed_paths, vec!["src/**"]);
    assert_eq!(task.depends_on, vec!["t-0"]);
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.context["note"], "hello");

    assert!(store.get_task("missing").await.is_err());
}

#[tokio::test]
async fn block_with_retry_strictly_increments() {
    let (store, _dir) = open_temp_store().await;
    let id = seed_task(&store, "Retry me").await;

    for expected in 1..=4_i64 {
        store
            .block_task_with_retry(&id, BlockReason::AwaitingJudge)
            .await
            .expect("block");
        let task = store.get_task(&id).await.expect("get");
        assert_eq!(task.retry_count, expected);
        assert_eq!(task.status, TaskStatus::Blocked);
        assert_eq!(task.block_reason, Some(BlockReason::AwaitingJudge));
    }

    // Plain status updates never touch the counter.
    store
        .set_task_status(&id, TaskStatus::Done, None)
        .await
        .expect("done");
    assert_eq!(store.get_task(&id).await.expect("get").retry_count, 4);
}

#[tokio::test]
async fn title_prefix_probe_respects_word_boundaries() {
    let (store, _dir) = open_temp_store().await;

    for title in [
        "[AutoFix] PR #7 (attempt 1/3)",
        "[AutoFix] PR #7 (attempt 2/3)",
        "[AutoFix] PR #70 (attempt 1/3)",
    ] {
        seed_task(&store, title).await;
    }

    assert_eq!(
        store
            .count_tasks_with_title_prefix("[AutoFix] PR #7")
            .await
            .expect("count"),
        2,
        "PR #70 must not count toward PR #7"
    );
    assert_eq!(
        store
            .count_tasks_with_title_prefix("[AutoFix] PR #70")
            .await
            .expect("count"),
        1
    );

    let active = store
        .active_task_with_title_prefix("[AutoFix] PR #7")
        .await
        .expect("probe")
        .expect("active task");
    assert!(active.title.starts_with("[AutoFix] PR #7 "));
}

#[tokio::test]
async fn active_probe_ignores_terminal_tasks() {
    let (store, _dir) = open_temp_store().await;
    let id = seed_task(&store, "[AutoFix] PR #9 (attempt 1/3)").await;

    assert!(store
        .active_task_with_title_prefix("[AutoFix] PR #9")
        .await
        .expect("probe")
        .is_some());

    store
        .set_task_status(&id, TaskStatus::Failed, None)
        .await
        .expect("fail");
    assert!(store
        .active_task_with_title_prefix("[AutoFix] PR #9")
        .await
        .expect("probe")
        .is_none());

    // Terminal tasks still count toward the attempt budget.
    assert_eq!(
        store
            .count_tasks_with_title_prefix("[AutoFix] PR #9")
            .await
            .expect("count"),
        1
    );
}

#[tokio::test]
async fn stale_scan_finds_only_awaiting_judge_tasks() {
    let (store, _dir) = open_temp_store().await;
    let waiting = seed_task(&store, "Waiting").await;
    let reworking = seed_task(&store, "Reworking").await;

    store
        .block_task_with_retry(&waiting, BlockReason::AwaitingJudge)
        .await
        .expect("block");
    store
        .block_task_with_retry(&reworking, BlockReason::NeedsRework)
        .await
        .expect("block");

    // Cutoff in the future captures everything stale up to now.
    let cutoff = armitage::store::to_rfc3339(chrono::Utc::now() + chrono::Duration::seconds(5));
    let stale = store
        .stale_awaiting_judge_tasks(&cutoff)
        .await
        .expect("scan");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, waiting);

    // Cutoff in the past captures nothing.
    let cutoff = armitage::store::to_rfc3339(chrono::Utc::now() - chrono::Duration::seconds(60));
    assert!(store
        .stale_awaiting_judge_tasks(&cutoff)
        .await
        .expect("scan")
        .is_empty());
}
