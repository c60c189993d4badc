//! Shared domain types for the judge.
//!
//! Every enum that is persisted to SQLite carries an `as_str`/`parse` pair so
//! the store layer round-trips lowercase text columns without serde
//! involvement. Evaluation result types ([`EvaluationSummary`],
//! [`JudgeResult`]) cross the evaluator → verdict → action boundary and are
//! therefore defined here rather than in any one of those modules.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when a stored text value does not map to a known enum.
#[derive(Debug, Error)]
#[error("invalid {field} value: {value}")]
pub struct InvalidEnum {
    /// Column or field name the value came from.
    pub field: &'static str,
    /// The offending value.
    pub value: String,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be picked up by a worker.
    Queued,
    /// Currently being executed.
    Running,
    /// Parked: see the block reason.
    Blocked,
    /// Terminal success.
    Done,
    /// Terminal failure.
    Failed,
}

impl TaskStatus {
    /// String representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(InvalidEnum {
                field: "task.status",
                value: other.to_owned(),
            }),
        }
    }
}

/// Why a blocked task is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The judge requested changes; a remediation task owns the follow-up.
    NeedsRework,
    /// A successful run is waiting for (or retrying) judgement.
    AwaitingJudge,
}

impl BlockReason {
    /// String representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NeedsRework => "needs_rework",
            Self::AwaitingJudge => "awaiting_judge",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised reason.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "needs_rework" => Ok(Self::NeedsRework),
            "awaiting_judge" => Ok(Self::AwaitingJudge),
            other => Err(InvalidEnum {
                field: "task.block_reason",
                value: other.to_owned(),
            }),
        }
    }
}

/// Risk classification for a task or a diff.
///
/// Ordered: `Low < Medium < High`, so the effective risk of a candidate is
/// simply `max(task_risk, diff_risk)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Small, contained change.
    #[default]
    Low,
    /// Moderate blast radius.
    Medium,
    /// Wide or sensitive change.
    High,
}

impl RiskLevel {
    /// String representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised level.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(InvalidEnum {
                field: "risk_level",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Status of one execution attempt of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Still executing.
    Running,
    /// Finished and produced an artifact.
    Success,
    /// Finished with an error.
    Failed,
    /// Aborted before completion.
    Cancelled,
}

impl RunStatus {
    /// String representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(InvalidEnum {
                field: "run.status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// What a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A pull request on the forge; `reference` is the PR number as text.
    Pr,
    /// A local working tree; `reference` is the worktree path.
    Worktree,
    /// Diff snapshot captured from a dirty base repo before stashing.
    BaseRepoDiff,
    /// Plugin-declared artifact kind, passed through opaquely.
    #[serde(untagged)]
    Other(String),
}

impl ArtifactKind {
    /// String representation stored in SQLite.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pr => "pr",
            Self::Worktree => "worktree",
            Self::BaseRepoDiff => "base_repo_diff",
            Self::Other(s) => s,
        }
    }

    /// Parse from a SQLite text value. Unknown kinds become [`Self::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "pr" => Self::Pr,
            "worktree" => Self::Worktree,
            "base_repo_diff" => Self::BaseRepoDiff,
            other => Self::Other(other.to_owned()),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge queue
// ---------------------------------------------------------------------------

/// Status of a merge-queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    /// Waiting for a drain pass.
    Pending,
    /// Claimed by a judge instance holding a live lease.
    Processing,
    /// Terminal: the PR merged.
    Merged,
    /// Terminal: attempts exhausted.
    Failed,
    /// Terminal: withdrawn.
    Cancelled,
}

impl QueueItemStatus {
    /// String representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Merged => "merged",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "merged" => Ok(Self::Merged),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(InvalidEnum {
                field: "merge_queue.status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Liveness status of a judge agent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Alive and between candidates.
    Idle,
    /// Alive and processing a candidate.
    Busy,
    /// No recent heartbeat.
    Offline,
}

impl AgentStatus {
    /// String representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            other => Err(InvalidEnum {
                field: "agent.status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Closed vocabulary of audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A verdict was delivered for a candidate.
    Review,
    /// A task was sent back to the judge-retry backlog.
    TaskRequeued,
    /// Backlog recovery re-armed a stuck run.
    TaskRecovered,
    /// An `[AutoFix]` follow-up task was created.
    AutofixTaskCreated,
    /// An `[AutoFix-Conflict]` follow-up task was created.
    ConflictAutofixTaskCreated,
    /// A `[Mainline-Recreate]` follow-up task was created.
    MainlineRecreateTaskCreated,
    /// Dirty base repo changes were stashed before a local merge.
    BaseRepoStashed,
    /// The LLM ruled on whether a stashed diff should be restored.
    BaseRepoRecoveryDecision,
    /// An approved PR was enqueued for asynchronous merge.
    MergeQueueEnqueued,
    /// An expired processing claim was swept back to pending.
    MergeQueueClaimRecovered,
    /// A queued PR merged.
    MergeQueueMerged,
    /// A queued merge attempt failed and was rescheduled.
    MergeQueueRetried,
    /// A queued PR exhausted its attempts.
    MergeQueueFailed,
    /// A documentation follow-up task was created.
    DocserTaskCreated,
}

impl EventKind {
    /// Wire string stored in the `events.kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Review => "judge.review",
            Self::TaskRequeued => "judge.task_requeued",
            Self::TaskRecovered => "judge.task_recovered",
            Self::AutofixTaskCreated => "judge.autofix_task_created",
            Self::ConflictAutofixTaskCreated => "judge.conflict_autofix_task_created",
            Self::MainlineRecreateTaskCreated => "judge.mainline_recreate_task_created",
            Self::BaseRepoStashed => "judge.base_repo_stashed",
            Self::BaseRepoRecoveryDecision => "judge.base_repo_recovery_decision",
            Self::MergeQueueEnqueued => "judge.merge_queue_enqueued",
            Self::MergeQueueClaimRecovered => "judge.merge_queue_claim_recovered",
            Self::MergeQueueMerged => "judge.merge_queue_merged",
            Self::MergeQueueRetried => "judge.merge_queue_retried",
            Self::MergeQueueFailed => "judge.merge_queue_failed",
            Self::DocserTaskCreated => "docser.task_created",
        }
    }
}

// ---------------------------------------------------------------------------
// Diff statistics
// ---------------------------------------------------------------------------

/// One changed file in a candidate diff, with line counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Repository-relative path.
    pub path: String,
    /// Added lines.
    pub additions: u64,
    /// Deleted lines.
    pub deletions: u64,
}

impl ChangedFile {
    /// Total churn for this file.
    pub fn churn(&self) -> u64 {
        self.additions.saturating_add(self.deletions)
    }
}

// ---------------------------------------------------------------------------
// Evaluation results
// ---------------------------------------------------------------------------

/// Continuous-integration result for a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiOutcome {
    /// Whether CI is green.
    pub pass: bool,
    /// Aggregate status word from the forge (e.g. `success`, `failure`).
    pub status: String,
    /// Human-readable reasons when failing.
    pub reasons: Vec<String>,
    /// Suggested next steps.
    pub suggestions: Vec<String>,
    /// Per-check detail lines.
    pub details: Vec<String>,
}

impl CiOutcome {
    /// A passing CI outcome with no detail (used for local worktrees, where
    /// CI is external to the judge loop).
    pub fn passing(status: &str) -> Self {
        Self {
            pass: true,
            status: status.to_owned(),
            reasons: Vec::new(),
            suggestions: Vec::new(),
            details: Vec::new(),
        }
    }
}

/// Severity of a policy violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    /// Worth mentioning, does not block.
    Info,
    /// Should be fixed, does not block on its own.
    Warning,
    /// Blocks approval.
    Error,
}

/// A single policy violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    /// Violation type slug (e.g. `path_not_allowed`, `diff_too_large`).
    pub kind: String,
    /// Severity of this violation.
    pub severity: ViolationSeverity,
    /// Human-readable message.
    pub message: String,
}

/// Repository-policy result for a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOutcome {
    /// Whether the diff satisfies policy.
    pub pass: bool,
    /// Human-readable reasons when failing.
    pub reasons: Vec<String>,
    /// Suggested next steps.
    pub suggestions: Vec<String>,
    /// Individual violations.
    pub violations: Vec<PolicyViolation>,
}

/// Severity of an LLM-reported code issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Informational.
    Info,
    /// Should be addressed.
    Warning,
    /// Must be addressed before merge.
    Error,
}

/// A concrete, actionable finding from the LLM review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeIssue {
    /// Severity of the finding.
    pub severity: IssueSeverity,
    /// Category slug (e.g. `correctness`, `security`).
    pub category: String,
    /// What is wrong.
    pub message: String,
    /// File path, when the finding is localised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line number, when the finding is localised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Suggested fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// LLM review result for a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmOutcome {
    /// Whether the LLM approved the change.
    pub pass: bool,
    /// Reviewer confidence in `[0, 1]`. Zero when the review did not run.
    pub confidence: f64,
    /// Human-readable reasons.
    pub reasons: Vec<String>,
    /// Suggested next steps.
    pub suggestions: Vec<String>,
    /// Concrete findings. Empty when the failure is not actionable.
    pub code_issues: Vec<CodeIssue>,
}

impl LlmOutcome {
    /// A synthetic "review skipped" outcome carrying a reason.
    ///
    /// Used when CI or policy already failed, when the LLM is disabled, or
    /// when the mergeability precheck refused to spend a review on a broken
    /// branch. Skipped reviews never fail the candidate on their own.
    pub fn skipped(reason: &str) -> Self {
        Self {
            pass: true,
            confidence: 0.0,
            reasons: vec![reason.to_owned()],
            suggestions: Vec::new(),
            code_issues: Vec::new(),
        }
    }
}

/// Everything the verdict engine needs about one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// CI result.
    pub ci: CiOutcome,
    /// Policy result.
    pub policy: PolicyOutcome,
    /// LLM result (possibly synthetic-skipped).
    pub llm: LlmOutcome,
    /// Whether the LLM review actually ran (false when skipped).
    pub llm_ran: bool,
    /// Effective risk: max of task-declared and diff-computed risk.
    pub risk: RiskLevel,
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Terminal review decision for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The change may merge.
    Approve,
    /// The change needs rework.
    RequestChanges,
}

impl Verdict {
    /// String representation used in events and review bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::RequestChanges => "request_changes",
        }
    }
}

/// Output of the verdict engine for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeResult {
    /// The decision.
    pub verdict: Verdict,
    /// Reasons backing the decision.
    pub reasons: Vec<String>,
    /// Suggestions for the author (or the remediation task).
    pub suggestions: Vec<String>,
    /// Whether the judge should attempt the merge itself.
    pub auto_merge: bool,
    /// Effective risk carried through from the summary.
    pub risk: RiskLevel,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}
