//! Pending-candidate scanner.
//!
//! Read-only producers over the store: runs that succeeded, have not been
//! judged, and belong to a blocked task, joined with the artifact that tells
//! the judge where the change lives. The scanner never claims anything;
//! duplicate yields across concurrent judges are filtered later by the
//! run-claim protocol.

use std::collections::HashSet;

use sqlx::Row;

use crate::config::JudgeConfig;
use crate::store::{Store, StoreError, TaskRow};

/// A PR candidate ready for judgement.
#[derive(Debug, Clone)]
pub struct PendingPr {
    /// PR number parsed from the artifact reference.
    pub pr_number: i64,
    /// PR web URL, when recorded.
    pub pr_url: Option<String>,
    /// The blocked source task.
    pub task: TaskRow,
    /// The successful, unjudged run.
    pub run_id: String,
    /// When the run started (drives processing order).
    pub started_at: String,
}

/// A worktree candidate ready for judgement.
#[derive(Debug, Clone)]
pub struct PendingWorktree {
    /// Worktree path from the artifact reference.
    pub worktree_path: String,
    /// Feature branch to merge.
    pub branch_name: String,
    /// Base branch to merge into.
    pub base_branch: String,
    /// Base repository path.
    pub base_repo_path: String,
    /// The blocked source task.
    pub task: TaskRow,
    /// The successful, unjudged run.
    pub run_id: String,
    /// When the run started.
    pub started_at: String,
}

/// Raw scan row before per-kind interpretation.
struct ScanRow {
    task_id: String,
    run_id: String,
    started_at: String,
    reference: String,
    url: Option<String>,
    metadata: serde_json::Value,
}

/// Candidates of one artifact kind, newest runs first, deduplicated by task.
async fn scan_kind(store: &Store, kind: &str) -> Result<Vec<ScanRow>, StoreError> {
    let rows = sqlx::query(
        "SELECT t.id AS task_id, r.id AS run_id, r.started_at, a.reference, a.url, a.metadata \
         FROM runs r \
         JOIN artifacts a ON a.run_id = r.id \
         JOIN tasks t ON t.id = r.task_id \
         WHERE a.kind = ?1 AND r.status = 'success' AND r.judged_at IS NULL \
         AND t.status = 'blocked' \
         ORDER BY r.started_at DESC",
    )
    .bind(kind)
    .fetch_all(store.pool())
    .await?;

    let mut seen_tasks: HashSet<String> = HashSet::new();
    let mut scan = Vec::new();
    for row in rows {
        let task_id: String = row.try_get("task_id")?;
        if !seen_tasks.insert(task_id.clone()) {
            continue;
        }
        let metadata: String = row.try_get("metadata")?;
        scan.push(ScanRow {
            task_id,
            run_id: row.try_get("run_id")?,
            started_at: row.try_get("started_at")?,
            reference: row.try_get("reference")?,
            url: row.try_get("url")?,
            metadata: serde_json::from_str(&metadata)?,
        });
    }
    Ok(scan)
}

/// PR candidates pending judgement.
///
/// Artifacts whose reference is not a number are skipped with a warning;
/// they cannot be acted on and would otherwise wedge the scan.
///
/// # Errors
///
/// Returns an error if the store query fails.
pub async fn pending_prs(store: &Store) -> Result<Vec<PendingPr>, StoreError> {
    let mut out = Vec::new();
    for row in scan_kind(store, "pr").await? {
        let Ok(pr_number) = row.reference.parse::<i64>() else {
            tracing::warn!(
                task_id = %row.task_id,
                reference = %row.reference,
                "pr artifact reference is not a number, skipping"
            );
            continue;
        };
        let task = store.get_task(&row.task_id).await?;
        out.push(PendingPr {
            pr_number,
            pr_url: row.url,
            task,
            run_id: row.run_id,
            started_at: row.started_at,
        });
    }
    Ok(out)
}

/// Worktree candidates pending judgement.
///
/// `base_branch` and `base_repo_path` fall back to the configured defaults
/// when missing from artifact metadata; a candidate with no branch name at
/// all is skipped.
///
/// # Errors
///
/// Returns an error if the store query fails.
pub async fn pending_worktrees(
    store: &Store,
    config: &JudgeConfig,
) -> Result<Vec<PendingWorktree>, StoreError> {
    let mut out = Vec::new();
    for row in scan_kind(store, "worktree").await? {
        let meta_str = |key: &str| {
            row.metadata
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(ToOwned::to_owned)
        };
        let Some(branch_name) = meta_str("branch_name") else {
            tracing::warn!(
                task_id = %row.task_id,
                worktree = %row.reference,
                "worktree artifact has no branch_name, skipping"
            );
            continue;
        };
        let base_branch =
            meta_str("base_branch").unwrap_or_else(|| config.local_base_branch.clone());
        let base_repo_path = match meta_str("base_repo_path").or_else(|| {
            config
                .local_base_repo_path
                .as_ref()
                .map(|p| p.display().to_string())
        }) {
            Some(p) => p,
            None => {
                tracing::warn!(
                    task_id = %row.task_id,
                    worktree = %row.reference,
                    "no base repo path in metadata or JUDGE_LOCAL_BASE_REPO_PATH, skipping"
                );
                continue;
            }
        };
        let task = store.get_task(&row.task_id).await?;
        out.push(PendingWorktree {
            worktree_path: row.reference,
            branch_name,
            base_branch,
            base_repo_path,
            task,
            run_id: row.run_id,
            started_at: row.started_at,
        });
    }
    Ok(out)
}
