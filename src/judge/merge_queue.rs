//! Merge-queue drain: expired-claim sweep, batch claim, lease heartbeat,
//! merge attempt, conditional finalize.
//!
//! Every finalize is conditional on the claim (owner, token) still being
//! held; losing it means another instance swept the lease, so the row is
//! left alone and logged — the sweep has already made it pending again.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::store::{MergeQueueRow, Store};
use crate::types::{EventKind, TaskStatus};

use super::{actions, docser, Judge};

/// How many rows one drain pass claims.
const BATCH_LIMIT: usize = 3;

/// Floor for the lease-renewal period.
const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

/// Drain the merge queue for one tick.
///
/// # Errors
///
/// Returns an error if the sweep or the claim query fails; per-row failures
/// are logged and absorbed.
pub(crate) async fn drain(judge: &Judge) -> Result<()> {
    let retry_delay_secs = i64::try_from(judge.config.queue_retry_delay.as_secs()).unwrap_or(30);
    let claim_ttl_secs = i64::try_from(judge.config.queue_claim_ttl.as_secs()).unwrap_or(120);

    // Phase 1: reclaim leases lost by crashed or stalled instances.
    let recovered = judge.store.recover_expired_claims(retry_delay_secs).await?;
    for row in &recovered {
        tracing::warn!(
            queue_id = %row.id,
            pr = row.pr_number,
            lost_owner = row.claim_owner.as_deref().unwrap_or("unknown"),
            "recovered expired merge-queue claim"
        );
        judge
            .store
            .record_event(
                EventKind::MergeQueueClaimRecovered,
                "merge_queue",
                &row.id,
                &judge.config.agent_id,
                json!({
                    "pr_number": row.pr_number,
                    "lost_owner": row.claim_owner,
                }),
            )
            .await?;
    }

    if judge.config.dry_run || judge.forge.is_none() {
        return Ok(());
    }

    // Phase 2: claim and process a batch.
    let claimed = judge
        .store
        .claim_pending_batch(&judge.config.agent_id, BATCH_LIMIT, claim_ttl_secs)
        .await?;
    for row in claimed {
        let queue_id = row.id.clone();
        let pr_number = row.pr_number;
        if let Err(e) = process_item(judge, row, claim_ttl_secs, retry_delay_secs).await {
            tracing::error!(
                queue_id = %queue_id,
                pr = pr_number,
                error = %format!("{e:#}"),
                "merge-queue item failed"
            );
        }
    }
    Ok(())
}

/// Renew the lease until aborted or the claim is lost.
fn spawn_lease_heartbeat(
    store: Store,
    id: String,
    owner: String,
    token: String,
    claim_ttl_secs: i64,
) -> JoinHandle<()> {
    let period = MIN_HEARTBEAT_PERIOD.max(Duration::from_secs(
        u64::try_from(claim_ttl_secs).unwrap_or(120) / 2,
    ));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // first tick completes immediately
        loop {
            interval.tick().await;
            match store.extend_claim(&id, &owner, &token, claim_ttl_secs).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(queue_id = %id, "merge-queue lease lost during renewal");
                    break;
                }
                Err(e) => {
                    tracing::warn!(queue_id = %id, error = %e, "lease renewal failed");
                }
            }
        }
    })
}

async fn process_item(
    judge: &Judge,
    row: MergeQueueRow,
    claim_ttl_secs: i64,
    retry_delay_secs: i64,
) -> Result<()> {
    let token = row
        .claim_token
        .clone()
        .context("claimed queue row is missing its token")?;
    let owner = judge.config.agent_id.clone();

    let heartbeat = spawn_lease_heartbeat(
        judge.store.clone(),
        row.id.clone(),
        owner.clone(),
        token.clone(),
        claim_ttl_secs,
    );

    let method = crate::forge::MergeMethod::parse(&judge.policy.auto_merge.method);
    let attempt = actions::attempt_merge(judge.forge()?, row.pr_number, method).await;

    heartbeat.abort();

    match attempt {
        Ok(result) if result.merged => finalize_merged(judge, &row, &owner, &token).await,
        Ok(result) => {
            let reason = result
                .reason
                .unwrap_or_else(|| "merge_incomplete".to_owned());
            finalize_failure(judge, &row, &owner, &token, retry_delay_secs, &reason).await
        }
        Err(e) => {
            let reason = format!("merge request error: {e:#}");
            finalize_failure(judge, &row, &owner, &token, retry_delay_secs, &reason).await
        }
    }
}

async fn finalize_merged(
    judge: &Judge,
    row: &MergeQueueRow,
    owner: &str,
    token: &str,
) -> Result<()> {
    if !judge.store.finalize_merged(&row.id, owner, token).await? {
        tracing::warn!(queue_id = %row.id, "claim lost before merged finalize, skipping");
        return Ok(());
    }

    let attempt_count = row.attempt_count.saturating_add(1);
    tracing::info!(pr = row.pr_number, attempt_count, "merge queue merged pr");
    judge
        .store
        .record_event(
            EventKind::MergeQueueMerged,
            "merge_queue",
            &row.id,
            &judge.config.agent_id,
            json!({ "pr_number": row.pr_number, "attempt_count": attempt_count }),
        )
        .await?;

    let task = judge.store.get_task(&row.task_id).await?;
    let changed_paths = match judge.forge()?.list_pr_files(row.pr_number).await {
        Ok(files) => files.into_iter().map(|f| f.path).collect(),
        Err(e) => {
            tracing::warn!(pr = row.pr_number, error = %e, "could not list merged files");
            Vec::new()
        }
    };

    judge
        .store
        .set_task_status(&task.id, TaskStatus::Done, None)
        .await?;
    docser::maybe_create_docser_task(
        &judge.store,
        &judge.policy,
        &judge.config.agent_id,
        None,
        &task,
        &changed_paths,
    )
    .await?;
    Ok(())
}

async fn finalize_failure(
    judge: &Judge,
    row: &MergeQueueRow,
    owner: &str,
    token: &str,
    retry_delay_secs: i64,
    reason: &str,
) -> Result<()> {
    let attempt_count = row.attempt_count.saturating_add(1);

    if attempt_count < row.max_attempts {
        if !judge
            .store
            .finalize_retry(&row.id, owner, token, retry_delay_secs, reason)
            .await?
        {
            tracing::warn!(queue_id = %row.id, "claim lost before retry finalize, skipping");
            return Ok(());
        }
        tracing::info!(
            pr = row.pr_number,
            attempt_count,
            max_attempts = row.max_attempts,
            reason,
            "merge attempt failed, queued for retry"
        );
        judge
            .store
            .record_event(
                EventKind::MergeQueueRetried,
                "merge_queue",
                &row.id,
                &judge.config.agent_id,
                json!({
                    "pr_number": row.pr_number,
                    "attempt_count": attempt_count,
                    "reason": reason,
                }),
            )
            .await?;
        return Ok(());
    }

    if !judge
        .store
        .finalize_failed(&row.id, owner, token, reason)
        .await?
    {
        tracing::warn!(queue_id = %row.id, "claim lost before failed finalize, skipping");
        return Ok(());
    }
    tracing::warn!(
        pr = row.pr_number,
        attempt_count,
        reason,
        "merge queue exhausted, escalating"
    );
    judge
        .store
        .record_event(
            EventKind::MergeQueueFailed,
            "merge_queue",
            &row.id,
            &judge.config.agent_id,
            json!({
                "pr_number": row.pr_number,
                "attempt_count": attempt_count,
                "reason": reason,
            }),
        )
        .await?;

    // Exhaustion feeds the conflict ladder: Conflict-AutoFix, then close +
    // Mainline-Recreate when that budget is spent too.
    let task = judge.store.get_task(&row.task_id).await?;
    let label = format!("PR #{}", row.pr_number);
    judge
        .escalate_conflict(&task, &label, Some(row.pr_number), reason, None)
        .await
}
