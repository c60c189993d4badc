//! Run table operations, including the run-claim protocol.
//!
//! A run is eligible for judgement iff `status = 'success' AND judged_at IS
//! NULL`. [`Store::claim_run`] is the single conditional update that gives a
//! judge instance exclusive ownership of that run's judgement; re-arming
//! (`judged_at := NULL`) makes the run eligible again.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::types::RunStatus;

use super::{now_rfc3339, Store, StoreError};

/// One execution attempt of a task.
#[derive(Debug, Clone)]
pub struct RunRow {
    /// Run id.
    pub id: String,
    /// Owning task id.
    pub task_id: String,
    /// Execution status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: String,
    /// When the run finished, if it has.
    pub finished_at: Option<String>,
    /// Error message for failed runs.
    pub error: Option<String>,
    /// When a judge claimed this run, if claimed.
    pub judged_at: Option<String>,
    /// Incremented on every claim; monotonic per run.
    pub judgement_version: i64,
}

fn run_from_row(row: &SqliteRow) -> Result<RunRow, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(RunRow {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        status: RunStatus::parse(&status)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error: row.try_get("error")?,
        judged_at: row.try_get("judged_at")?,
        judgement_version: row.try_get("judgement_version")?,
    })
}

const SELECT_RUN: &str = "SELECT id, task_id, status, started_at, finished_at, error, \
     judged_at, judgement_version FROM runs";

impl Store {
    /// Insert a run row (used by workers and by test fixtures).
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_run(
        &self,
        task_id: &str,
        status: RunStatus,
        started_at: &str,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let finished_at = match status {
            RunStatus::Running => None,
            _ => Some(now_rfc3339()),
        };
        sqlx::query(
            "INSERT INTO runs (id, task_id, status, started_at, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(status.as_str())
        .bind(started_at)
        .bind(finished_at)
        .execute(self.pool())
        .await?;
        Ok(id)
    }

    /// Fetch one run by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such run exists.
    pub async fn get_run(&self, id: &str) -> Result<RunRow, StoreError> {
        let row = sqlx::query(&format!("{SELECT_RUN} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "run",
                id: id.to_owned(),
            })?;
        run_from_row(&row)
    }

    /// Atomically claim a run for judgement.
    ///
    /// Sets `judged_at = now` and bumps `judgement_version`, but only when
    /// the run is still `success` and unclaimed. Returns true iff this call
    /// won the claim; false means another judge already owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn claim_run(&self, run_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE runs SET judged_at = ?2, judgement_version = judgement_version + 1 \
             WHERE id = ?1 AND status = 'success' AND judged_at IS NULL",
        )
        .bind(run_id)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Re-arm a claimed run so it becomes eligible for judgement again.
    ///
    /// Returns true iff the run was claimed and is now unclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn rearm_run(&self, run_id: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE runs SET judged_at = NULL WHERE id = ?1 AND judged_at IS NOT NULL")
                .bind(run_id)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether the task has any successful run still awaiting judgement.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn pending_judgement_run_exists(&self, task_id: &str) -> Result<bool, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM runs WHERE task_id = ?1 AND status = 'success' \
             AND judged_at IS NULL",
        )
        .bind(task_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }

    /// Latest successful run of the task that carries an artifact of one of
    /// the given kinds, regardless of claim state.
    ///
    /// Backlog recovery uses this to find the run to re-arm.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn latest_judgeable_run(
        &self,
        task_id: &str,
        artifact_kinds: &[&str],
    ) -> Result<Option<RunRow>, StoreError> {
        // Anonymous placeholders so the IN list can be any length; kinds are
        // a small fixed set.
        let placeholders = vec!["?"; artifact_kinds.len()].join(", ");
        let sql = format!(
            "SELECT r.id, r.task_id, r.status, r.started_at, r.finished_at, r.error, \
             r.judged_at, r.judgement_version FROM runs r \
             JOIN artifacts a ON a.run_id = r.id \
             WHERE r.task_id = ? AND r.status = 'success' AND a.kind IN ({placeholders}) \
             ORDER BY r.started_at DESC LIMIT 1"
        );
        let mut query = sqlx::query(&sql).bind(task_id);
        for kind in artifact_kinds {
            query = query.bind(*kind);
        }
        let row = query.fetch_optional(self.pool()).await?;
        row.as_ref().map(run_from_row).transpose()
    }
}
