//! Circuit breakers and failure classifiers.
//!
//! Pure text/shape classification over evaluation results. These are what
//! keep the judge out of doom loops: a non-actionable LLM failure (quota,
//! precheck refusal, transport noise) must never burn an AutoFix attempt or
//! immediately re-arm the same run, and a candidate that keeps bouncing gets
//! escalated instead of retried forever.

use crate::types::EvaluationSummary;

/// Literal marker an upstream reviewer embeds when it detects that the same
/// candidate keeps failing the same way.
pub const DOOM_LOOP_MARKER: &str = "doom_loop_detected";

/// Reason-text fragments that mark an LLM failure as non-actionable.
const NON_ACTIONABLE_KEYWORDS: &[&str] = &[
    "quota",
    "rate limit",
    "resource_exhausted",
    "pr_merge_conflict_detected",
    "pr_base_behind",
    "mergeability_precheck_failed",
    "llm review failed",
    "encountered an error",
    "manual review recommended",
];

/// Reason-text fragments that mean "this PR cannot merge as-is".
const CONFLICT_KEYWORDS: &[&str] = &[
    "not mergeable",
    "merge conflict",
    "conflict",
    "mergeable_state",
    "dirty",
    "update_branch_failed",
    "pr_merge_conflict_detected",
];

fn matches_any(text: &str, keywords: &[&str]) -> bool {
    let lowered = text.to_ascii_lowercase();
    keywords.iter().any(|k| lowered.contains(k))
}

/// Whether a merge-failure reason carries a conflict signal.
///
/// Idempotent: classifying the same text twice yields the same answer.
pub fn conflict_signal(reason: &str) -> bool {
    matches_any(reason, CONFLICT_KEYWORDS)
}

/// Whether the LLM failed with concrete findings a worker can act on.
pub fn has_actionable_llm_failures(summary: &EvaluationSummary) -> bool {
    !summary.llm.pass && !summary.llm.code_issues.is_empty()
}

/// Whether the LLM failure is non-actionable: no findings, and either zero
/// confidence or a reason that names an infrastructure problem.
///
/// Mutually exclusive with [`has_actionable_llm_failures`] by construction
/// (one requires findings, the other requires their absence).
pub fn is_non_actionable_llm_failure(summary: &EvaluationSummary) -> bool {
    if summary.llm.pass || !summary.llm.code_issues.is_empty() {
        return false;
    }
    summary.llm.confidence <= 0.0
        || summary
            .llm
            .reasons
            .iter()
            .any(|r| matches_any(r, NON_ACTIONABLE_KEYWORDS))
}

/// Whether the reviewer flagged a doom loop.
pub fn doom_loop_flagged(summary: &EvaluationSummary) -> bool {
    summary
        .llm
        .reasons
        .iter()
        .any(|r| r.contains(DOOM_LOOP_MARKER))
}

/// Doom-loop breaker: the reviewer flagged a loop and the task has already
/// been retried past the threshold.
pub fn should_break_doom_loop(
    summary: &EvaluationSummary,
    retry_count: i64,
    threshold: i64,
) -> bool {
    doom_loop_flagged(summary) && retry_count >= threshold
}

/// Legacy non-approve breaker: too many retries on CI/policy failures.
pub fn should_break_non_approve(retry_count: i64, threshold: i64) -> bool {
    retry_count >= threshold
}
