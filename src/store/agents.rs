//! Agent liveness table operations.
//!
//! Each judge process registers one row and heartbeats it. The heartbeat
//! only ever promotes `offline` back to `idle`; busy/idle transitions are
//! made around candidate processing and must never clobber a concurrent
//! status written by the same process.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::types::AgentStatus;

use super::{now_rfc3339, Store, StoreError};

/// One judge agent row.
#[derive(Debug, Clone)]
pub struct AgentRow {
    /// Agent id.
    pub id: String,
    /// Role (always `judge` for this service).
    pub role: String,
    /// Liveness status.
    pub status: AgentStatus,
    /// Candidate task currently being processed, if busy.
    pub current_task_id: Option<String>,
    /// Last heartbeat timestamp.
    pub last_heartbeat: Option<String>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
}

fn agent_from_row(row: &SqliteRow) -> Result<AgentRow, StoreError> {
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(AgentRow {
        id: row.try_get("id")?,
        role: row.try_get("role")?,
        status: AgentStatus::parse(&status)?,
        current_task_id: row.try_get("current_task_id")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

impl Store {
    /// Register this judge's agent row, creating it idle if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn register_agent(&self, id: &str, role: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO agents (id, role, status, last_heartbeat, metadata) \
             VALUES (?1, ?2, 'idle', ?3, '{}') \
             ON CONFLICT(id) DO UPDATE SET role = ?2, last_heartbeat = ?3",
        )
        .bind(id)
        .bind(role)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch one agent row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such agent exists.
    pub async fn get_agent(&self, id: &str) -> Result<AgentRow, StoreError> {
        let row = sqlx::query(
            "SELECT id, role, status, current_task_id, last_heartbeat, metadata \
             FROM agents WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "agent",
            id: id.to_owned(),
        })?;
        agent_from_row(&row)
    }

    /// Record a heartbeat, promoting `offline` to `idle` and touching no
    /// other status.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn heartbeat_agent(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE agents SET last_heartbeat = ?2, \
             status = CASE WHEN status = 'offline' THEN 'idle' ELSE status END \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Set the agent's status and current task.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        current_task_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE agents SET status = ?2, current_task_id = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status.as_str())
            .bind(current_task_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
