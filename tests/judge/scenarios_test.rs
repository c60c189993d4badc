//! End-to-end candidate scenarios driven through `Judge::tick`.

use std::sync::Arc;

use armitage::judge::Judge;
use armitage::policy::ReviewPolicy;
use armitage::store::NewTask;
use armitage::types::{
    BlockReason, CodeIssue, IssueSeverity, LlmOutcome, TaskStatus, Verdict,
};

use crate::util::{open_temp_store, seed_pr_candidate, test_config, MockForge, MockLlm};

fn failing_llm(confidence: f64, reasons: &[&str], issues: usize) -> LlmOutcome {
    LlmOutcome {
        pass: false,
        confidence,
        reasons: reasons.iter().map(|r| (*r).to_owned()).collect(),
        suggestions: vec![],
        code_issues: (0..issues)
            .map(|i| CodeIssue {
                severity: IssueSeverity::Error,
                category: "correctness".to_owned(),
                message: format!("issue {i}"),
                file: Some("src/lib.rs".to_owned()),
                line: Some(10),
                suggestion: None,
            })
            .collect(),
    }
}

#[tokio::test]
async fn clean_candidate_is_approved_merged_and_documented() {
    let (store, _dir) = open_temp_store().await;
    let (task_id, run_id) = seed_pr_candidate(&store, 42, "Implement parser").await;

    let forge = Arc::new(MockForge::new(42));
    forge.queue_merge_result(true, "merged");

    let judge = Judge::new(test_config(), ReviewPolicy::default(), store.clone())
        .with_forge(forge.clone())
        .with_llm(Arc::new(MockLlm::passing(0.9)));

    judge.tick().await;

    // The run is claimed exactly once.
    let run = store.get_run(&run_id).await.expect("run");
    assert!(run.judged_at.is_some());
    assert_eq!(run.judgement_version, 1);

    // Verdict event: approve with auto-merge.
    let events = store.events_for_entity("task", &task_id).await.expect("events");
    let review = events
        .iter()
        .find(|e| e.kind == "judge.review")
        .expect("review event");
    assert_eq!(review.payload["verdict"], Verdict::Approve.as_str());
    assert_eq!(review.payload["auto_merge"], true);

    // An approving review was posted, the PR merged, the task completed.
    let reviews = forge.reviews.lock().expect("lock");
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].1, "APPROVE");
    let task = store.get_task(&task_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Done);

    // A documentation follow-up exists.
    assert!(events.iter().any(|e| e.kind == "docser.task_created"));
}

#[tokio::test]
async fn actionable_llm_failure_creates_autofix() {
    let (store, _dir) = open_temp_store().await;
    let (task_id, _run_id) = seed_pr_candidate(&store, 42, "Implement parser").await;

    let forge = Arc::new(MockForge::new(42));
    let llm = Arc::new(MockLlm::with_outcome(failing_llm(
        0.8,
        &["unwrap on user input"],
        1,
    )));
    let judge = Judge::new(test_config(), ReviewPolicy::default(), store.clone())
        .with_forge(forge.clone())
        .with_llm(llm);

    judge.tick().await;

    let task = store.get_task(&task_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Blocked);
    assert_eq!(task.block_reason, Some(BlockReason::NeedsRework));
    assert_eq!(task.retry_count, 1);

    let autofix = store
        .active_task_with_title_prefix("[AutoFix] PR #42")
        .await
        .expect("query")
        .expect("autofix task");
    assert_eq!(autofix.title, "[AutoFix] PR #42 (attempt 1/3)");
    assert_eq!(autofix.role, "worker");
    assert_eq!(autofix.timebox_minutes, Some(60));

    let events = store.events_for_entity("task", &task_id).await.expect("events");
    let created = events
        .iter()
        .find(|e| e.kind == "judge.autofix_task_created")
        .expect("autofix event");
    assert_eq!(created.payload["attempt"], 1);

    // A changes-requested review was posted.
    let reviews = forge.reviews.lock().expect("lock");
    assert_eq!(reviews[0].1, "REQUEST_CHANGES");
}

#[tokio::test]
async fn non_actionable_llm_failure_waits_without_autofix() {
    let (store, _dir) = open_temp_store().await;
    let (task_id, run_id) = seed_pr_candidate(&store, 42, "Implement parser").await;

    let forge = Arc::new(MockForge::new(42));
    let llm = Arc::new(MockLlm::with_outcome(failing_llm(
        0.0,
        &["LLM review failed: quota exceeded"],
        0,
    )));
    let judge = Judge::new(test_config(), ReviewPolicy::default(), store.clone())
        .with_forge(forge)
        .with_llm(llm);

    judge.tick().await;

    let task = store.get_task(&task_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Blocked);
    assert_eq!(task.block_reason, Some(BlockReason::AwaitingJudge));
    assert_eq!(task.retry_count, 1);

    // The run stays claimed: no immediate re-arm for non-actionable noise.
    let run = store.get_run(&run_id).await.expect("run");
    assert!(run.judged_at.is_some());

    // No AutoFix task was burned on an infrastructure failure.
    assert!(store
        .active_task_with_title_prefix("[AutoFix] PR #42")
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn exhausted_conflict_ladder_closes_pr_and_recreates() {
    let (store, _dir) = open_temp_store().await;
    let (task_id, _run_id) = seed_pr_candidate(&store, 7, "Refactor config").await;

    // Three spent conflict attempts already exist.
    for attempt in 1..=3 {
        let id = store
            .create_task(&NewTask {
                title: format!("[AutoFix-Conflict] PR #7 (attempt {attempt}/3)"),
                goal: "resolve conflict".to_owned(),
                ..NewTask::default()
            })
            .await
            .expect("create prior attempt");
        store
            .set_task_status(&id, TaskStatus::Failed, None)
            .await
            .expect("finish prior attempt");
    }

    let mut forge = MockForge::new(7);
    forge.update_branch_error = Some("Pull Request is not mergeable".to_owned());
    let forge = Arc::new(forge);
    // merge_results empty: every merge attempt reports "not mergeable".

    let judge = Judge::new(test_config(), ReviewPolicy::default(), store.clone())
        .with_forge(forge.clone())
        .with_llm(Arc::new(MockLlm::passing(0.9)));

    judge.tick().await;

    // The PR was closed on the forge.
    assert_eq!(*forge.closed.lock().expect("lock"), vec![7]);

    // A mainline recreate task exists and the source task failed.
    let recreate = store
        .active_task_with_title_prefix("[Mainline-Recreate] PR #7")
        .await
        .expect("query")
        .expect("recreate task");
    assert_eq!(recreate.title, "[Mainline-Recreate] PR #7 (attempt 1/3)");
    assert_eq!(recreate.allowed_paths, vec!["**"]);

    let task = store.get_task(&task_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Failed);

    let events = store.events_for_entity("task", &task_id).await.expect("events");
    assert!(events
        .iter()
        .any(|e| e.kind == "judge.mainline_recreate_task_created"));
}

#[tokio::test]
async fn merge_queue_retries_then_merges() {
    let (store, _dir) = open_temp_store().await;

    // The source task exists but is not a scan candidate (not blocked).
    let task_id = store
        .create_task(&NewTask {
            title: "Ship feature".to_owned(),
            goal: "ship it".to_owned(),
            ..NewTask::default()
        })
        .await
        .expect("create task");
    let run_id = store
        .insert_run(
            &task_id,
            armitage::types::RunStatus::Success,
            &armitage::store::now_rfc3339(),
        )
        .await
        .expect("insert run");

    let outcome = store
        .enqueue_merge(100, &task_id, &run_id, 0, 3)
        .await
        .expect("enqueue");
    let queue_id = match outcome {
        armitage::store::EnqueueOutcome::Enqueued { id } => id,
        other => panic!("unexpected enqueue outcome: {other:?}"),
    };

    let forge = Arc::new(MockForge::new(100));
    forge.queue_merge_result(false, "base branch was modified");
    forge.queue_merge_result(true, "merged");

    let judge = Judge::new(test_config(), ReviewPolicy::default(), store.clone())
        .with_forge(forge.clone());

    // First drain: the attempt fails and the row goes back to pending.
    judge.tick().await;
    let row = store.get_queue_item(&queue_id).await.expect("row");
    assert_eq!(row.status, armitage::types::QueueItemStatus::Pending);
    assert_eq!(row.attempt_count, 1);

    // Second drain: merged.
    judge.tick().await;
    let row = store.get_queue_item(&queue_id).await.expect("row");
    assert_eq!(row.status, armitage::types::QueueItemStatus::Merged);
    assert_eq!(row.attempt_count, 2);

    let task = store.get_task(&task_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Done);

    let events = store
        .events_for_entity("merge_queue", &queue_id)
        .await
        .expect("events");
    let merged = events
        .iter()
        .find(|e| e.kind == "judge.merge_queue_merged")
        .expect("merged event");
    assert_eq!(merged.payload["attempt_count"], 2);
    assert!(events.iter().any(|e| e.kind == "judge.merge_queue_retried"));
}

#[tokio::test]
async fn dry_run_claims_and_mutates_nothing() {
    let (store, _dir) = open_temp_store().await;
    let (task_id, run_id) = seed_pr_candidate(&store, 42, "Implement parser").await;

    let forge = Arc::new(MockForge::new(42));
    let mut config = test_config();
    config.dry_run = true;

    let judge = Judge::new(config, ReviewPolicy::default(), store.clone())
        .with_forge(forge.clone())
        .with_llm(Arc::new(MockLlm::passing(0.9)));

    judge.tick().await;

    let run = store.get_run(&run_id).await.expect("run");
    assert!(run.judged_at.is_none());
    let task = store.get_task(&task_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Blocked);
    assert!(forge.reviews.lock().expect("lock").is_empty());
}
