//! Forge adapter abstraction.
//!
//! Defines the [`Forge`] trait and shared request/response types. One
//! implementation is provided: [`github::GithubForge`] over the GitHub REST
//! API. Tests inject mocks through the trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ChangedFile;

pub mod github;

/// Forge operation errors.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Transport-level failure (connect, TLS, timeout).
    #[error("forge http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The forge answered with a non-success status.
    #[error("forge api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },
    /// Response body did not have the expected shape.
    #[error("forge decode error: {0}")]
    Decode(String),
}

impl ForgeError {
    /// Whether this error is plausibly transient (rate limit, server error).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Pull-request metadata.
#[derive(Debug, Clone)]
pub struct PrInfo {
    /// PR number.
    pub number: i64,
    /// PR title.
    pub title: String,
    /// Author login.
    pub author: String,
    /// Head branch name.
    pub head_ref: String,
    /// Head commit SHA.
    pub head_sha: String,
    /// Base branch name.
    pub base_ref: String,
    /// `open` or `closed`.
    pub state: String,
    /// Whether the PR is already merged.
    pub merged: bool,
    /// Whether the forge considers the PR mergeable, when it has decided.
    pub mergeable: Option<bool>,
    /// Forge mergeability detail (`clean`, `dirty`, `behind`, ...).
    pub mergeable_state: Option<String>,
    /// Web URL.
    pub url: String,
}

/// Aggregate CI state for a commit.
#[derive(Debug, Clone)]
pub struct CombinedStatus {
    /// Overall state (`success`, `failure`, `pending`).
    pub state: String,
    /// Number of contexts reporting.
    pub total_count: i64,
    /// Per-check detail.
    pub contexts: Vec<CheckContext>,
}

/// One CI check context.
#[derive(Debug, Clone)]
pub struct CheckContext {
    /// Check name.
    pub context: String,
    /// Check state.
    pub state: String,
    /// Check description, when present.
    pub description: Option<String>,
}

/// Review event to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEvent {
    /// Approving review.
    Approve,
    /// Changes-requested review.
    RequestChanges,
}

/// Merge method to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    /// Merge commit.
    Merge,
    /// Squash merge.
    Squash,
    /// Rebase merge.
    Rebase,
}

impl MergeMethod {
    /// Wire string for the forge API.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }

    /// Parse a policy string, defaulting to squash.
    pub fn parse(s: &str) -> Self {
        match s {
            "merge" => Self::Merge,
            "rebase" => Self::Rebase,
            _ => Self::Squash,
        }
    }
}

/// Outcome of a merge request.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Whether the PR merged.
    pub merged: bool,
    /// Forge message (failure reason when not merged).
    pub message: String,
}

/// Capabilities the judge needs from a forge.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Fetch PR metadata.
    async fn get_pr(&self, number: i64) -> Result<PrInfo, ForgeError>;

    /// List the files changed by a PR with line counts.
    async fn list_pr_files(&self, number: i64) -> Result<Vec<ChangedFile>, ForgeError>;

    /// Fetch the PR's unified diff.
    async fn pr_diff(&self, number: i64) -> Result<String, ForgeError>;

    /// Aggregate CI status for a commit.
    async fn combined_status(&self, sha: &str) -> Result<CombinedStatus, ForgeError>;

    /// Post a plain comment on a PR.
    async fn add_pr_comment(&self, number: i64, body: &str) -> Result<(), ForgeError>;

    /// Create an approving or changes-requested review.
    async fn create_review(
        &self,
        number: i64,
        event: ReviewEvent,
        body: &str,
    ) -> Result<(), ForgeError>;

    /// Request a merge.
    async fn merge_pr(&self, number: i64, method: MergeMethod) -> Result<MergeOutcome, ForgeError>;

    /// Ask the forge to update the PR branch from its base.
    async fn update_branch(&self, number: i64) -> Result<(), ForgeError>;

    /// Login of the authenticated identity (for the self-authorship probe).
    async fn authenticated_user(&self) -> Result<String, ForgeError>;

    /// Close a PR without merging.
    async fn close_pr(&self, number: i64) -> Result<(), ForgeError>;
}
