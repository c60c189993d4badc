//! Append-only audit event log.
//!
//! Every verdict, requeue, recovery, and queue transition is recorded here
//! through one choke point so the dashboard and the duplicate guards (e.g.
//! the docser trigger) share a single source.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::types::EventKind;

use super::{now_rfc3339, Store, StoreError};

/// One audit record. Events are never mutated.
#[derive(Debug, Clone)]
pub struct EventRow {
    /// Event id.
    pub id: String,
    /// Wire kind string (e.g. `judge.review`).
    pub kind: String,
    /// Entity type the event is about (`task`, `run`, `merge_queue`, ...).
    pub entity_type: String,
    /// Entity id.
    pub entity_id: String,
    /// Judge agent that emitted the event.
    pub agent_id: String,
    /// Structured payload.
    pub payload: serde_json::Value,
    /// Emission timestamp.
    pub created_at: String,
}

fn event_from_row(row: &SqliteRow) -> Result<EventRow, StoreError> {
    let payload: String = row.try_get("payload")?;
    Ok(EventRow {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        agent_id: row.try_get("agent_id")?,
        payload: serde_json::from_str(&payload)?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    /// Append one audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record_event(
        &self,
        kind: EventKind,
        entity_type: &str,
        entity_id: &str,
        agent_id: &str,
        payload: serde_json::Value,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO events (id, kind, entity_type, entity_id, agent_id, payload, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(entity_type)
        .bind(entity_id)
        .bind(agent_id)
        .bind(serde_json::to_string(&payload)?)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(id)
    }

    /// All events for an entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<EventRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, kind, entity_type, entity_id, agent_id, payload, created_at \
             FROM events WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY created_at ASC",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    /// Whether any event of `kind` exists for the entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn has_event(
        &self,
        kind: EventKind,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<bool, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM events WHERE kind = ?1 AND entity_type = ?2 AND entity_id = ?3",
        )
        .bind(kind.as_str())
        .bind(entity_type)
        .bind(entity_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }
}
