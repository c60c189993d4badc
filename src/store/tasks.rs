//! Task table operations.
//!
//! Tasks are created by an upstream planner or by the judge itself
//! (remediation and documentation follow-ups). The judge only ever moves
//! tasks between `blocked`, `done`, and `failed`; the retry counter is
//! incremented on every requeue so circuit breakers can observe doom loops.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::types::{BlockReason, RiskLevel, TaskStatus};

use super::{now_rfc3339, Store, StoreError};

/// A fully-hydrated task row.
#[derive(Debug, Clone)]
pub struct TaskRow {
    /// Stable task id.
    pub id: String,
    /// Short human title; remediation tasks carry a `[AutoFix]`-style prefix.
    pub title: String,
    /// What the worker is asked to achieve.
    pub goal: String,
    /// Executing role (`worker`, `docser`, ...).
    pub role: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Why the task is blocked, when it is.
    pub block_reason: Option<BlockReason>,
    /// Declared risk level.
    pub risk_level: RiskLevel,
    /// Scheduling priority; higher ranks first.
    pub priority: i64,
    /// Path globs the worker may touch.
    pub allowed_paths: Vec<String>,
    /// Command patterns the worker must not run.
    pub denied_commands: Vec<String>,
    /// Verification commands run by the worker before handing off.
    pub verify_commands: Vec<String>,
    /// Ordered dependency task ids.
    pub depends_on: Vec<String>,
    /// Times this task has been requeued by the judge.
    pub retry_count: i64,
    /// Wall-clock budget in minutes, if bounded.
    pub timebox_minutes: Option<i64>,
    /// Task kind (`code`, `research`, ...).
    pub kind: String,
    /// Free-form context blob.
    pub context: serde_json::Value,
    /// Creation timestamp.
    pub created_at: String,
    /// Last mutation timestamp.
    pub updated_at: String,
}

/// Parameters for inserting a judge-created task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Task goal.
    pub goal: String,
    /// Executing role.
    pub role: String,
    /// Declared risk.
    pub risk_level: RiskLevel,
    /// Scheduling priority.
    pub priority: i64,
    /// Allowed path globs.
    pub allowed_paths: Vec<String>,
    /// Denied command patterns.
    pub denied_commands: Vec<String>,
    /// Verification commands.
    pub verify_commands: Vec<String>,
    /// Dependency task ids.
    pub depends_on: Vec<String>,
    /// Timebox in minutes.
    pub timebox_minutes: Option<i64>,
    /// Task kind.
    pub kind: String,
    /// Context blob (remediation notes, violations, prior failure reasons).
    pub context: serde_json::Value,
}

impl Default for NewTask {
    fn default() -> Self {
        Self {
            title: String::new(),
            goal: String::new(),
            role: "worker".to_owned(),
            risk_level: RiskLevel::Medium,
            priority: 0,
            allowed_paths: Vec::new(),
            denied_commands: Vec::new(),
            verify_commands: Vec::new(),
            depends_on: Vec::new(),
            timebox_minutes: None,
            kind: "code".to_owned(),
            context: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// Escape `%` and `_` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn task_from_row(row: &SqliteRow) -> Result<TaskRow, StoreError> {
    let status: String = row.try_get("status")?;
    let block_reason: Option<String> = row.try_get("block_reason")?;
    let risk: String = row.try_get("risk_level")?;
    let allowed_paths: String = row.try_get("allowed_paths")?;
    let denied_commands: String = row.try_get("denied_commands")?;
    let verify_commands: String = row.try_get("verify_commands")?;
    let depends_on: String = row.try_get("depends_on")?;
    let context: String = row.try_get("context")?;

    Ok(TaskRow {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        goal: row.try_get("goal")?,
        role: row.try_get("role")?,
        status: TaskStatus::parse(&status)?,
        block_reason: block_reason.as_deref().map(BlockReason::parse).transpose()?,
        risk_level: RiskLevel::parse(&risk)?,
        priority: row.try_get("priority")?,
        allowed_paths: serde_json::from_str(&allowed_paths)?,
        denied_commands: serde_json::from_str(&denied_commands)?,
        verify_commands: serde_json::from_str(&verify_commands)?,
        depends_on: serde_json::from_str(&depends_on)?,
        retry_count: row.try_get("retry_count")?,
        timebox_minutes: row.try_get("timebox_minutes")?,
        kind: row.try_get("kind")?,
        context: serde_json::from_str(&context)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_TASK: &str = "SELECT id, title, goal, role, status, block_reason, risk_level, \
     priority, allowed_paths, denied_commands, verify_commands, depends_on, retry_count, \
     timebox_minutes, kind, context, created_at, updated_at FROM tasks";

impl Store {
    /// Insert a new task and return its generated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_task(&self, new: &NewTask) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO tasks (id, title, goal, role, status, risk_level, priority, \
             allowed_paths, denied_commands, verify_commands, depends_on, retry_count, \
             timebox_minutes, kind, context, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13, ?14, ?14)",
        )
        .bind(&id)
        .bind(&new.title)
        .bind(&new.goal)
        .bind(&new.role)
        .bind(new.risk_level.as_str())
        .bind(new.priority)
        .bind(serde_json::to_string(&new.allowed_paths)?)
        .bind(serde_json::to_string(&new.denied_commands)?)
        .bind(serde_json::to_string(&new.verify_commands)?)
        .bind(serde_json::to_string(&new.depends_on)?)
        .bind(new.timebox_minutes)
        .bind(&new.kind)
        .bind(serde_json::to_string(&new.context)?)
        .bind(&now)
        .execute(self.pool())
        .await?;
        Ok(id)
    }

    /// Fetch one task by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such task exists.
    pub async fn get_task(&self, id: &str) -> Result<TaskRow, StoreError> {
        let row = sqlx::query(&format!("{SELECT_TASK} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "task",
                id: id.to_owned(),
            })?;
        task_from_row(&row)
    }

    /// Set a task's status and block reason unconditionally.
    ///
    /// Returns false if the task does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        block_reason: Option<BlockReason>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?2, block_reason = ?3, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(block_reason.map(BlockReason::as_str))
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Block a task with the given reason and strictly increment its retry
    /// counter.
    ///
    /// Every judge-driven requeue goes through here, which is what makes the
    /// retry count a reliable doom-loop signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn block_task_with_retry(
        &self,
        id: &str,
        reason: BlockReason,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'blocked', block_reason = ?2, \
             retry_count = retry_count + 1, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(reason.as_str())
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find an active (queued/running/blocked) task whose title starts with
    /// `prefix` followed by a word boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn active_task_with_title_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<TaskRow>, StoreError> {
        let pattern = format!("{} %", escape_like(prefix));
        let row = sqlx::query(&format!(
            "{SELECT_TASK} WHERE (title = ?1 OR title LIKE ?2 ESCAPE '\\') \
             AND status IN ('queued', 'running', 'blocked') \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(prefix)
        .bind(&pattern)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Count all tasks (any status) whose title starts with `prefix`
    /// followed by a word boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_tasks_with_title_prefix(&self, prefix: &str) -> Result<i64, StoreError> {
        let pattern = format!("{} %", escape_like(prefix));
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tasks WHERE title = ?1 OR title LIKE ?2 ESCAPE '\\'",
        )
        .bind(prefix)
        .bind(&pattern)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Tasks stuck in `blocked/awaiting_judge` whose last update is at or
    /// before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn stale_awaiting_judge_tasks(
        &self,
        cutoff: &str,
    ) -> Result<Vec<TaskRow>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_TASK} WHERE status = 'blocked' AND block_reason = 'awaiting_judge' \
             AND updated_at <= ?1 ORDER BY updated_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(task_from_row).collect()
    }
}
