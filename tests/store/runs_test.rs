//! Run-claim protocol: at-most-once judgement per run.

use armitage::types::RunStatus;

use crate::util::{open_temp_store, seed_run, seed_task};

#[tokio::test]
async fn claim_is_at_most_once_until_rearmed() {
    let (store, _dir) = open_temp_store().await;
    let task_id = seed_task(&store, "Claim me").await;
    let run_id = seed_run(&store, &task_id).await;

    assert!(store.claim_run(&run_id).await.expect("first claim"));
    assert!(!store.claim_run(&run_id).await.expect("second claim"));
    assert!(!store.claim_run(&run_id).await.expect("third claim"));

    let run = store.get_run(&run_id).await.expect("run");
    assert!(run.judged_at.is_some());
    assert_eq!(run.judgement_version, 1);

    // Re-arm restores exactly one more successful claim.
    assert!(store.rearm_run(&run_id).await.expect("rearm"));
    assert!(!store.rearm_run(&run_id).await.expect("double rearm"));
    assert!(store.claim_run(&run_id).await.expect("reclaim"));
    assert!(!store.claim_run(&run_id).await.expect("reclaim again"));

    let run = store.get_run(&run_id).await.expect("run");
    assert_eq!(run.judgement_version, 2);
}

#[tokio::test]
async fn concurrent_claims_grant_exactly_one_winner() {
    let (store, _dir) = open_temp_store().await;
    let task_id = seed_task(&store, "Contended").await;
    let run_id = seed_run(&store, &task_id).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let run_id = run_id.clone();
        handles.push(tokio::spawn(async move {
            store.claim_run(&run_id).await.expect("claim")
        }));
    }
    let mut winners: i32 = 0;
    for handle in handles {
        if handle.await.expect("join") {
            winners = winners.saturating_add(1);
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn only_successful_unclaimed_runs_are_claimable() {
    let (store, _dir) = open_temp_store().await;
    let task_id = seed_task(&store, "Mixed runs").await;

    let failed = store
        .insert_run(&task_id, RunStatus::Failed, &armitage::store::now_rfc3339())
        .await
        .expect("failed run");
    let running = store
        .insert_run(&task_id, RunStatus::Running, &armitage::store::now_rfc3339())
        .await
        .expect("running run");

    assert!(!store.claim_run(&failed).await.expect("claim failed run"));
    assert!(!store.claim_run(&running).await.expect("claim running run"));
    assert!(!store.claim_run("no-such-run").await.expect("claim missing"));
}

#[tokio::test]
async fn pending_judgement_probe_tracks_claims() {
    let (store, _dir) = open_temp_store().await;
    let task_id = seed_task(&store, "Probe").await;
    let run_id = seed_run(&store, &task_id).await;

    assert!(store
        .pending_judgement_run_exists(&task_id)
        .await
        .expect("probe"));
    store.claim_run(&run_id).await.expect("claim");
    assert!(!store
        .pending_judgement_run_exists(&task_id)
        .await
        .expect("probe"));
}
