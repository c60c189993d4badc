//! Merge-queue table operations: enqueue dedup, lease-based claims, and
//! conditional finalizes.
//!
//! The queue decouples "approved with auto-merge" from "merge actually
//! completed". Claims are leases: a `processing` row carries an owner, an
//! opaque token, and an expiry; only the holder of (owner, token) may
//! finalize, and anything past expiry is swept back to `pending` by the next
//! drain pass on any judge instance.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::types::QueueItemStatus;

use super::{now_rfc3339, Store, StoreError};

/// How many claim attempts to make under contention before giving up.
const CLAIM_RETRIES: usize = 5;

/// One merge-queue row.
#[derive(Debug, Clone)]
pub struct MergeQueueRow {
    /// Queue row id.
    pub id: String,
    /// PR number awaiting merge.
    pub pr_number: i64,
    /// Source task id.
    pub task_id: String,
    /// Source run id.
    pub run_id: String,
    /// Queue status.
    pub status: QueueItemStatus,
    /// Priority; higher drains first.
    pub priority: i64,
    /// Merge attempts made so far.
    pub attempt_count: i64,
    /// Attempt budget.
    pub max_attempts: i64,
    /// Earliest next attempt time.
    pub next_attempt_at: String,
    /// Most recent failure reason.
    pub last_error: Option<String>,
    /// Claiming agent id, while processing.
    pub claim_owner: Option<String>,
    /// Opaque claim token, while processing.
    pub claim_token: Option<String>,
    /// Lease expiry, while processing.
    pub claim_expires_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last mutation timestamp.
    pub updated_at: String,
}

/// Result of an enqueue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new row was created.
    Enqueued {
        /// The new row's id.
        id: String,
    },
    /// An active row for this PR already exists.
    ExistingActive {
        /// The existing row's id.
        id: String,
        /// Its current status, for the caller to mirror into the source task.
        status: QueueItemStatus,
    },
    /// This (task, run) pair was already enqueued once.
    DuplicateSourceRun {
        /// The existing row's id.
        id: String,
        /// Its current status.
        status: QueueItemStatus,
    },
}

fn queue_from_row(row: &SqliteRow) -> Result<MergeQueueRow, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(MergeQueueRow {
        id: row.try_get("id")?,
        pr_number: row.try_get("pr_number")?,
        task_id: row.try_get("task_id")?,
        run_id: row.try_get("run_id")?,
        status: QueueItemStatus::parse(&status)?,
        priority: row.try_get("priority")?,
        attempt_count: row.try_get("attempt_count")?,
        max_attempts: row.try_get("max_attempts")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        last_error: row.try_get("last_error")?,
        claim_owner: row.try_get("claim_owner")?,
        claim_token: row.try_get("claim_token")?,
        claim_expires_at: row.try_get("claim_expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_QUEUE: &str = "SELECT id, pr_number, task_id, run_id, status, priority, \
     attempt_count, max_attempts, next_attempt_at, last_error, claim_owner, claim_token, \
     claim_expires_at, created_at, updated_at FROM pr_merge_queue";

impl Store {
    /// Fetch one queue row by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such row exists.
    pub async fn get_queue_item(&self, id: &str) -> Result<MergeQueueRow, StoreError> {
        let row = sqlx::query(&format!("{SELECT_QUEUE} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "merge_queue item",
                id: id.to_owned(),
            })?;
        queue_from_row(&row)
    }

    /// The live (pending/processing) row for a PR, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn active_queue_row_for_pr(
        &self,
        pr_number: i64,
    ) -> Result<Option<MergeQueueRow>, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_QUEUE} WHERE pr_number = ?1 AND status IN ('pending', 'processing') LIMIT 1"
        ))
        .bind(pr_number)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(queue_from_row).transpose()
    }

    /// The queue row for a (task, run) pair, if one was ever created.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn queue_row_for_source_run(
        &self,
        task_id: &str,
        run_id: &str,
    ) -> Result<Option<MergeQueueRow>, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_QUEUE} WHERE task_id = ?1 AND run_id = ?2 LIMIT 1"
        ))
        .bind(task_id)
        .bind(run_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(queue_from_row).transpose()
    }

    /// Enqueue a PR for asynchronous merge.
    ///
    /// Rejects duplicates by live pr-number row and by (task, run) pair.
    /// A racing insert that trips a unique constraint is re-read and mapped
    /// to the same outcomes, so callers see one of exactly three results.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails for any reason other than a
    /// mapped unique-constraint violation.
    pub async fn enqueue_merge(
        &self,
        pr_number: i64,
        task_id: &str,
        run_id: &str,
        priority: i64,
        max_attempts: i64,
    ) -> Result<EnqueueOutcome, StoreError> {
        if let Some(existing) = self.active_queue_row_for_pr(pr_number).await? {
            return Ok(EnqueueOutcome::ExistingActive {
                id: existing.id,
                status: existing.status,
            });
        }
        if let Some(existing) = self.queue_row_for_source_run(task_id, run_id).await? {
            return Ok(EnqueueOutcome::DuplicateSourceRun {
                id: existing.id,
                status: existing.status,
            });
        }

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO pr_merge_queue (id, pr_number, task_id, run_id, status, priority, \
             attempt_count, max_attempts, next_attempt_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0, ?6, ?7, ?7, ?7)",
        )
        .bind(&id)
        .bind(pr_number)
        .bind(task_id)
        .bind(run_id)
        .bind(priority)
        .bind(max_attempts)
        .bind(&now)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(EnqueueOutcome::Enqueued { id }),
            Err(e) if is_unique_violation(&e) => {
                // Lost a race; surface whichever row won.
                if let Some(existing) = self.active_queue_row_for_pr(pr_number).await? {
                    return Ok(EnqueueOutcome::ExistingActive {
                        id: existing.id,
                        status: existing.status,
                    });
                }
                if let Some(existing) = self.queue_row_for_source_run(task_id, run_id).await? {
                    return Ok(EnqueueOutcome::DuplicateSourceRun {
                        id: existing.id,
                        status: existing.status,
                    });
                }
                Err(StoreError::Database(e))
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Sweep expired processing claims back to `pending`.
    ///
    /// Each recovered row has its claim cleared and its next attempt pushed
    /// out by `retry_delay_secs`. Returns the rows as they were before
    /// recovery so the caller can log who lost the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn recover_expired_claims(
        &self,
        retry_delay_secs: i64,
    ) -> Result<Vec<MergeQueueRow>, StoreError> {
        let now = now_rfc3339();
        let rows = sqlx::query(&format!(
            "{SELECT_QUEUE} WHERE status = 'processing' AND claim_expires_at IS NOT NULL \
             AND claim_expires_at <= ?1"
        ))
        .bind(&now)
        .fetch_all(self.pool())
        .await?;

        let next_attempt = now_plus_secs(retry_delay_secs.max(0));
        let mut recovered = Vec::new();
        for row in &rows {
            let item = queue_from_row(row)?;
            let token = item.claim_token.clone().unwrap_or_default();
            // Conditional on the token we observed so a freshly-renewed lease
            // is left alone.
            let result = sqlx::query(
                "UPDATE pr_merge_queue SET status = 'pending', claim_owner = NULL, \
                 claim_token = NULL, claim_expires_at = NULL, next_attempt_at = ?3, \
                 updated_at = ?4 \
                 WHERE id = ?1 AND status = 'processing' AND claim_token = ?2 \
                 AND claim_expires_at <= ?5",
            )
            .bind(&item.id)
            .bind(&token)
            .bind(&next_attempt)
            .bind(now_rfc3339())
            .bind(&now)
            .execute(self.pool())
            .await?;
            if result.rows_affected() > 0 {
                recovered.push(item);
            }
        }
        Ok(recovered)
    }

    /// Claim up to `limit` pending rows for this judge instance.
    ///
    /// Candidates are ordered by (priority desc, next_attempt_at asc,
    /// created_at asc); each claim is a conditional update, retried up to
    /// five passes when other instances win rows first. Returns the claimed
    /// rows with their fresh claim fields.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn claim_pending_batch(
        &self,
        owner: &str,
        limit: usize,
        claim_ttl_secs: i64,
    ) -> Result<Vec<MergeQueueRow>, StoreError> {
        let mut claimed: Vec<MergeQueueRow> = Vec::new();

        for _ in 0..CLAIM_RETRIES {
            if claimed.len() >= limit {
                break;
            }
            let now = now_rfc3339();
            let want = limit.saturating_sub(claimed.len());
            let candidates = sqlx::query(&format!(
                "{SELECT_QUEUE} WHERE status = 'pending' AND next_attempt_at <= ?1 \
                 ORDER BY priority DESC, next_attempt_at ASC, created_at ASC LIMIT ?2"
            ))
            .bind(&now)
            .bind(i64::try_from(want).unwrap_or(i64::MAX))
            .fetch_all(self.pool())
            .await?;

            if candidates.is_empty() {
                break;
            }

            let mut won_any = false;
            for row in &candidates {
                if claimed.len() >= limit {
                    break;
                }
                let item = queue_from_row(row)?;
                let token = Uuid::new_v4().to_string();
                let expires = now_plus_secs(claim_ttl_secs);
                let result = sqlx::query(
                    "UPDATE pr_merge_queue SET status = 'processing', claim_owner = ?2, \
                     claim_token = ?3, claim_expires_at = ?4, updated_at = ?5 \
                     WHERE id = ?1 AND status = 'pending'",
                )
                .bind(&item.id)
                .bind(owner)
                .bind(&token)
                .bind(&expires)
                .bind(now_rfc3339())
                .execute(self.pool())
                .await?;
                if result.rows_affected() > 0 {
                    won_any = true;
                    claimed.push(self.get_queue_item(&item.id).await?);
                }
            }

            if !won_any {
                // Every candidate went to another instance; try a fresh scan.
                continue;
            }
        }

        Ok(claimed)
    }

    /// Extend a held lease. Returns false if the claim was lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn extend_claim(
        &self,
        id: &str,
        owner: &str,
        token: &str,
        claim_ttl_secs: i64,
    ) -> Result<bool, StoreError> {
        let expires = now_plus_secs(claim_ttl_secs);
        let result = sqlx::query(
            "UPDATE pr_merge_queue SET claim_expires_at = ?4, updated_at = ?5 \
             WHERE id = ?1 AND status = 'processing' AND claim_owner = ?2 AND claim_token = ?3",
        )
        .bind(id)
        .bind(owner)
        .bind(token)
        .bind(&expires)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Finalize a held row as merged, counting the successful attempt.
    ///
    /// Returns false if the claim was lost (another instance swept it).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn finalize_merged(
        &self,
        id: &str,
        owner: &str,
        token: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE pr_merge_queue SET status = 'merged', attempt_count = attempt_count + 1, \
             claim_owner = NULL, claim_token = NULL, claim_expires_at = NULL, updated_at = ?4 \
             WHERE id = ?1 AND status = 'processing' AND claim_owner = ?2 AND claim_token = ?3",
        )
        .bind(id)
        .bind(owner)
        .bind(token)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Finalize a held row back to `pending` after a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn finalize_retry(
        &self,
        id: &str,
        owner: &str,
        token: &str,
        retry_delay_secs: i64,
        error: &str,
    ) -> Result<bool, StoreError> {
        let next_attempt = now_plus_secs(retry_delay_secs.max(0));
        let result = sqlx::query(
            "UPDATE pr_merge_queue SET status = 'pending', attempt_count = attempt_count + 1, \
             next_attempt_at = ?4, last_error = ?5, claim_owner = NULL, claim_token = NULL, \
             claim_expires_at = NULL, updated_at = ?6 \
             WHERE id = ?1 AND status = 'processing' AND claim_owner = ?2 AND claim_token = ?3",
        )
        .bind(id)
        .bind(owner)
        .bind(token)
        .bind(&next_attempt)
        .bind(error)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Finalize a held row as failed after exhausting its attempts.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn finalize_failed(
        &self,
        id: &str,
        owner: &str,
        token: &str,
        error: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE pr_merge_queue SET status = 'failed', attempt_count = attempt_count + 1, \
             last_error = ?4, claim_owner = NULL, claim_token = NULL, claim_expires_at = NULL, \
             updated_at = ?5 \
             WHERE id = ?1 AND status = 'processing' AND claim_owner = ?2 AND claim_token = ?3",
        )
        .bind(id)
        .bind(owner)
        .bind(token)
        .bind(error)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Whether a sqlx error is a unique-constraint violation.
fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

/// Now plus `secs`, saturating instead of panicking on absurd offsets.
fn now_plus_secs(secs: i64) -> String {
    let now = chrono::Utc::now();
    super::to_rfc3339(
        now.checked_add_signed(chrono::Duration::seconds(secs))
            .unwrap_or(now),
    )
}
