//! Auto-remediation ladder: AutoFix, Conflict-AutoFix, Mainline-Recreate.
//!
//! Every rung follows the same protocol: probe for an already-active
//! follow-up, enforce the attempt budget by counting historical tasks with
//! the same title prefix, then insert a constrained worker task carrying the
//! evidence (policy violations, LLM findings, previous failure reasons) in
//! its context blob. Conflict rungs widen the allowed paths to `**` because
//! resolving a base merge touches files outside the original scope.

use anyhow::Result;
use serde_json::json;

use crate::store::{NewTask, Store, TaskRow};
use crate::types::{EvaluationSummary, EventKind, RiskLevel};

/// Timebox for remediation tasks, in minutes.
const REMEDIATION_TIMEBOX_MINUTES: i64 = 60;

/// The three remediation rungs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationKind {
    /// Fix review findings on the existing branch.
    AutoFix,
    /// Resolve a merge conflict against the base branch.
    ConflictAutoFix,
    /// Recreate the change from the current mainline after the conflict
    /// ladder is exhausted.
    MainlineRecreate,
}

impl RemediationKind {
    /// Title prefix for a candidate label (e.g. `PR #42`).
    pub fn title_prefix(self, label: &str) -> String {
        match self {
            Self::AutoFix => format!("[AutoFix] {label}"),
            Self::ConflictAutoFix => format!("[AutoFix-Conflict] {label}"),
            Self::MainlineRecreate => format!("[Mainline-Recreate] {label}"),
        }
    }

    /// Slug used in outcome strings and logs.
    pub fn slug(self) -> &'static str {
        match self {
            Self::AutoFix => "autofix",
            Self::ConflictAutoFix => "conflict_autofix",
            Self::MainlineRecreate => "mainline_recreate",
        }
    }

    /// Audit event emitted on creation.
    fn event_kind(self) -> EventKind {
        match self {
            Self::AutoFix => EventKind::AutofixTaskCreated,
            Self::ConflictAutoFix => EventKind::ConflictAutofixTaskCreated,
            Self::MainlineRecreate => EventKind::MainlineRecreateTaskCreated,
        }
    }

    /// Priority bump over the source task; conflicts outrank plain fixes.
    fn priority_bump(self) -> i64 {
        match self {
            Self::AutoFix => 10,
            Self::ConflictAutoFix => 20,
            Self::MainlineRecreate => 15,
        }
    }

    /// Whether this rung needs repository-wide path access.
    fn widens_paths(self) -> bool {
        matches!(self, Self::ConflictAutoFix | Self::MainlineRecreate)
    }

    fn goal(self, label: &str) -> String {
        match self {
            Self::AutoFix => format!(
                "Address the automated review findings on {label}. Fix only what the \
                 findings describe, keep the change minimal, and push to the same branch."
            ),
            Self::ConflictAutoFix => format!(
                "Resolve the merge conflict blocking {label} against its base branch. \
                 Merge the base branch in, resolve conflicts preserving the change's \
                 intent, and push to the same branch."
            ),
            Self::MainlineRecreate => format!(
                "The conflict-resolution budget for {label} is exhausted and the PR has \
                 been closed. Recreate the change on a fresh branch from the current \
                 mainline and open a new PR."
            ),
        }
    }
}

/// Evidence carried into the remediation task's context blob.
#[derive(Debug, Clone, Default)]
pub struct RemediationNotes {
    /// Reason the previous attempt failed, when known.
    pub previous_failure_reason: Option<String>,
    /// Reason the latest judge retry was scheduled, when known.
    pub latest_retry_reason: Option<String>,
    /// Reason the latest AutoFix attempt failed, when known.
    pub latest_autofix_failure_reason: Option<String>,
}

/// Outcome of an [`ensure_remediation_task`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// A new follow-up task was created.
    Created {
        /// The new task id.
        task_id: String,
        /// Which attempt this is (1-based).
        attempt: i64,
    },
    /// An active follow-up of this kind already exists.
    ExistingActive {
        /// The active task id.
        task_id: String,
    },
    /// The attempt budget is spent.
    AttemptLimitReached {
        /// Historical attempt count.
        count: i64,
        /// The budget.
        max: i64,
    },
}

impl RemediationOutcome {
    /// Stable outcome string for logs and task context.
    pub fn describe(&self, kind: RemediationKind) -> String {
        match self {
            Self::Created { task_id, attempt } => {
                format!("{}_created:{task_id}:attempt_{attempt}", kind.slug())
            }
            Self::ExistingActive { task_id } => {
                format!("existing_active_{}:{task_id}", kind.slug())
            }
            Self::AttemptLimitReached { count, max } => {
                format!("{}_attempt_limit_reached:{count}/{max}", kind.slug())
            }
        }
    }
}

/// Ensure a remediation follow-up exists for `label`, respecting the active
/// probe and the attempt budget.
///
/// `max_attempts < 0` means unlimited (the doom-loop breaker uses this).
///
/// # Errors
///
/// Returns an error if a store operation fails.
#[allow(clippy::too_many_arguments)]
pub async fn ensure_remediation_task(
    store: &Store,
    agent_id: &str,
    kind: RemediationKind,
    label: &str,
    source_task: &TaskRow,
    summary: Option<&EvaluationSummary>,
    notes: &RemediationNotes,
    max_attempts: i64,
) -> Result<RemediationOutcome> {
    let prefix = kind.title_prefix(label);

    if let Some(active) = store.active_task_with_title_prefix(&prefix).await? {
        tracing::info!(
            kind = kind.slug(),
            label,
            task_id = %active.id,
            "active remediation task already exists"
        );
        return Ok(RemediationOutcome::ExistingActive { task_id: active.id });
    }

    let count = store.count_tasks_with_title_prefix(&prefix).await?;
    let unlimited = max_attempts < 0;
    if !unlimited && count >= max_attempts {
        tracing::warn!(
            kind = kind.slug(),
            label,
            count,
            max = max_attempts,
            "remediation attempt limit reached"
        );
        return Ok(RemediationOutcome::AttemptLimitReached {
            count,
            max: max_attempts,
        });
    }

    let attempt = count.saturating_add(1);
    let title = if unlimited {
        format!("{prefix} (attempt {attempt})")
    } else {
        format!("{prefix} (attempt {attempt}/{max_attempts})")
    };

    let context = json!({
        "remediation": kind.slug(),
        "source_task_id": source_task.id,
        "candidate": label,
        "attempt": attempt,
        "policy_violations": summary.map(|s| s.policy.violations.clone()),
        "code_issues": summary.map(|s| s.llm.code_issues.clone()),
        "llm_reasons": summary.map(|s| s.llm.reasons.clone()),
        "previous_failure_reason": notes.previous_failure_reason,
        "latest_retry_reason": notes.latest_retry_reason,
        "latest_autofix_failure_reason": notes.latest_autofix_failure_reason,
    });

    let allowed_paths = if kind.widens_paths() {
        vec!["**".to_owned()]
    } else {
        source_task.allowed_paths.clone()
    };

    let task_id = store
        .create_task(&NewTask {
            title,
            goal: kind.goal(label),
            role: "worker".to_owned(),
            risk_level: RiskLevel::Medium,
            priority: source_task.priority.saturating_add(kind.priority_bump()),
            allowed_paths,
            denied_commands: source_task.denied_commands.clone(),
            verify_commands: source_task.verify_commands.clone(),
            depends_on: Vec::new(),
            timebox_minutes: Some(REMEDIATION_TIMEBOX_MINUTES),
            kind: "code".to_owned(),
            context,
        })
        .await?;

    store
        .record_event(
            kind.event_kind(),
            "task",
            &source_task.id,
            agent_id,
            json!({
                "remediation_task_id": task_id,
                "candidate": label,
                "attempt": attempt,
                "max_attempts": if unlimited { serde_json::Value::Null } else { json!(max_attempts) },
            }),
        )
        .await?;

    tracing::info!(
        kind = kind.slug(),
        label,
        task_id = %task_id,
        attempt,
        "remediation task created"
    );
    Ok(RemediationOutcome::Created { task_id, attempt })
}
