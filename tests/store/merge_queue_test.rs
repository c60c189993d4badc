//! Merge-queue store: enqueue dedup, lease claims, conditional finalizes.

use armitage::store::EnqueueOutcome;
use armitage::types::QueueItemStatus;

use crate::util::{open_temp_store, seed_run, seed_task};

#[tokio::test]
async fn enqueue_is_idempotent_per_pr_and_per_source_run() {
    let (store, _dir) = open_temp_store().await;
    let task_a = seed_task(&store, "A").await;
    let run_a = seed_run(&store, &task_a).await;
    let task_b = seed_task(&store, "B").await;
    let run_b = seed_run(&store, &task_b).await;

    let first = store
        .enqueue_merge(50, &task_a, &run_a, 0, 3)
        .await
        .expect("enqueue");
    let EnqueueOutcome::Enqueued { id } = first else {
        panic!("expected fresh enqueue, got {first:?}");
    };

    // Same PR from a different source: existing active row wins.
    let second = store
        .enqueue_merge(50, &task_b, &run_b, 0, 3)
        .await
        .expect("enqueue");
    assert_eq!(
        second,
        EnqueueOutcome::ExistingActive {
            id: id.clone(),
            status: QueueItemStatus::Pending,
        }
    );

    // Same source run under a different PR number: duplicate source.
    let third = store
        .enqueue_merge(51, &task_a, &run_a, 0, 3)
        .await
        .expect("enqueue");
    assert_eq!(
        third,
        EnqueueOutcome::DuplicateSourceRun {
            id,
            status: QueueItemStatus::Pending,
        }
    );

    // Still exactly one live row for PR 50.
    let row = store
        .active_queue_row_for_pr(50)
        .await
        .expect("query")
        .expect("row");
    assert_eq!(row.attempt_count, 0);
}

#[tokio::test]
async fn claim_batch_orders_by_priority_then_age() {
    let (store, _dir) = open_temp_store().await;
    let mut ids = Vec::new();
    for (pr, priority) in [(1_i64, 0_i64), (2, 10), (3, 5)] {
        let task = seed_task(&store, &format!("T{pr}")).await;
        let run = seed_run(&store, &task).await;
        let outcome = store
            .enqueue_merge(pr, &task, &run, priority, 3)
            .await
            .expect("enqueue");
        if let EnqueueOutcome::Enqueued { id } = outcome {
            ids.push(id);
        }
    }

    let claimed = store
        .claim_pending_batch("judge-a", 2, 120)
        .await
        .expect("claim");
    let claimed_prs: Vec<i64> = claimed.iter().map(|r| r.pr_number).collect();
    assert_eq!(claimed_prs, vec![2, 3], "highest priority first");

    for row in &claimed {
        assert_eq!(row.status, QueueItemStatus::Processing);
        assert_eq!(row.claim_owner.as_deref(), Some("judge-a"));
        assert!(row.claim_token.is_some());
        assert!(row.claim_expires_at.is_some());
    }

    // A second judge only sees what is left.
    let leftover = store
        .claim_pending_batch("judge-b", 3, 120)
        .await
        .expect("claim");
    assert_eq!(leftover.len(), 1);
    assert_eq!(leftover[0].pr_number, 1);
}

#[tokio::test]
async fn finalize_requires_the_held_claim() {
    let (store, _dir) = open_temp_store().await;
    let task = seed_task(&store, "T").await;
    let run = seed_run(&store, &task).await;
    store
        .enqueue_merge(60, &task, &run, 0, 3)
        .await
        .expect("enqueue");

    let claimed = store
        .claim_pending_batch("judge-a", 1, 120)
        .await
        .expect("claim");
    let row = &claimed[0];
    let token = row.claim_token.clone().expect("token");

    // Wrong owner or token never finalizes.
    assert!(!store
        .finalize_merged(&row.id, "judge-b", &token)
        .await
        .expect("finalize"));
    assert!(!store
        .finalize_merged(&row.id, "judge-a", "bogus-token")
        .await
        .expect("finalize"));

    assert!(store
        .finalize_merged(&row.id, "judge-a", &token)
        .await
        .expect("finalize"));
    let row = store.get_queue_item(&row.id).await.expect("row");
    assert_eq!(row.status, QueueItemStatus::Merged);
    assert_eq!(row.attempt_count, 1);
    assert!(row.claim_token.is_none());

    // A finalized row cannot be finalized again.
    assert!(!store
        .finalize_failed(&row.id, "judge-a", &token, "late")
        .await
        .expect("finalize"));
}

#[tokio::test]
async fn expired_claims_are_swept_back_to_pending() {
    let (store, _dir) = open_temp_store().await;
    let task = seed_task(&store, "T").await;
    let run = seed_run(&store, &task).await;
    store
        .enqueue_merge(70, &task, &run, 0, 3)
        .await
        .expect("enqueue");

    // TTL of zero seconds: the lease is expired the moment it is taken.
    let claimed = store
        .claim_pending_batch("judge-a", 1, 0)
        .await
        .expect("claim");
    assert_eq!(claimed.len(), 1);
    let token = claimed[0].claim_token.clone().expect("token");

    let recovered = store.recover_expired_claims(0).await.expect("sweep");
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].pr_number, 70);

    let row = store.get_queue_item(&claimed[0].id).await.expect("row");
    assert_eq!(row.status, QueueItemStatus::Pending);
    assert!(row.claim_owner.is_none());
    assert!(row.claim_expires_at.is_none());

    // The dead judge's finalize must lose.
    assert!(!store
        .finalize_merged(&claimed[0].id, "judge-a", &token)
        .await
        .expect("finalize"));
}

#[tokio::test]
async fn live_claims_are_not_swept_and_can_be_extended() {
    let (store, _dir) = open_temp_store().await;
    let task = seed_task(&store, "T").await;
    let run = seed_run(&store, &task).await;
    store
        .enqueue_merge(80, &task, &run, 0, 3)
        .await
        .expect("enqueue");

    let claimed = store
        .claim_pending_batch("judge-a", 1, 3600)
        .await
        .expect("claim");
    let row = &claimed[0];
    let token = row.claim_token.clone().expect("token");

    assert!(store.recover_expired_claims(0).await.expect("sweep").is_empty());

    assert!(store
        .extend_claim(&row.id, "judge-a", &token, 3600)
        .await
        .expect("extend"));
    assert!(!store
        .extend_claim(&row.id, "judge-b", &token, 3600)
        .await
        .expect("extend"));

    // Retry finalize pushes the row back with the error recorded.
    assert!(store
        .finalize_retry(&row.id, "judge-a", &token, 0, "flaky forge")
        .await
        .expect("finalize"));
    let row = store.get_queue_item(&row.id).await.expect("row");
    assert_eq!(row.status, QueueItemStatus::Pending);
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("flaky forge"));
}
