//! Artifact table operations.
//!
//! Artifacts are immutable once written; the judge reads them to locate PR
//! numbers and worktree paths, and writes exactly one kind itself:
//! `base_repo_diff` snapshots captured during dirty-base recovery.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::types::ArtifactKind;

use super::{now_rfc3339, Store, StoreError};

/// A run output record.
#[derive(Debug, Clone)]
pub struct ArtifactRow {
    /// Artifact id.
    pub id: String,
    /// Producing run id.
    pub run_id: String,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// PR number as text, worktree path, or opaque reference.
    pub reference: String,
    /// Web URL, when one exists.
    pub url: Option<String>,
    /// Metadata blob (`base_branch`, `branch_name`, `base_repo_path`, ...).
    pub metadata: serde_json::Value,
    /// Creation timestamp.
    pub created_at: String,
}

impl ArtifactRow {
    /// Read a string field out of the metadata blob.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Parameters for inserting an artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    /// Producing run id.
    pub run_id: String,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Reference string.
    pub reference: String,
    /// Web URL.
    pub url: Option<String>,
    /// Metadata blob.
    pub metadata: serde_json::Value,
}

fn artifact_from_row(row: &SqliteRow) -> Result<ArtifactRow, StoreError> {
    let kind: String = row.try_get("kind")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(ArtifactRow {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        kind: ArtifactKind::parse(&kind),
        reference: row.try_get("reference")?,
        url: row.try_get("url")?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    /// Insert an artifact and return its generated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_artifact(&self, new: &NewArtifact) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO artifacts (id, run_id, kind, reference, url, metadata, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&id)
        .bind(&new.run_id)
        .bind(new.kind.as_str())
        .bind(&new.reference)
        .bind(&new.url)
        .bind(serde_json::to_string(&new.metadata)?)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(id)
    }

    /// All artifacts produced by a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn artifacts_for_run(&self, run_id: &str) -> Result<Vec<ArtifactRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, run_id, kind, reference, url, metadata, created_at \
             FROM artifacts WHERE run_id = ?1 ORDER BY created_at ASC",
        )
        .bind(run_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(artifact_from_row).collect()
    }
}
