//! Action executor: deliver a verdict to the forge and interpret merge
//! outcomes.
//!
//! Posting is side-effectful and therefore dry-run aware; interpretation of
//! a merge attempt is pure over the forge's answers and is what feeds the
//! merge-deferred routing (queue, conflict ladder, retry).

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::forge::{Forge, MergeMethod, PrInfo, ReviewEvent};
use crate::types::{EvaluationSummary, JudgeResult, Verdict};

/// Merge-deferral reason when the forge reports a merge already underway.
pub const REASON_MERGE_IN_PROGRESS: &str = "merge_already_in_progress";
/// Merge-deferral reason when a branch update was requested instead.
pub const REASON_UPDATE_BRANCH_REQUESTED: &str = "update_branch_requested";

/// Interpreted result of one merge attempt.
#[derive(Debug, Clone)]
pub struct MergeAttempt {
    /// The PR is merged (either by this attempt or found merged on re-fetch).
    pub merged: bool,
    /// The merge did not complete but is expected to become possible.
    pub merge_deferred: bool,
    /// Why the merge did not complete, when it did not.
    pub reason: Option<String>,
}

impl MergeAttempt {
    fn merged_now() -> Self {
        Self {
            merged: true,
            merge_deferred: false,
            reason: None,
        }
    }

    fn deferred(reason: &str) -> Self {
        Self {
            merged: false,
            merge_deferred: true,
            reason: Some(reason.to_owned()),
        }
    }

    fn stuck(reason: String) -> Self {
        Self {
            merged: false,
            merge_deferred: false,
            reason: Some(reason),
        }
    }
}

/// Render the structured review body posted to the forge.
pub fn format_review_body(result: &JudgeResult, summary: &EvaluationSummary) -> String {
    let mut body = String::new();
    let heading = match result.verdict {
        Verdict::Approve => "Automated review: approved",
        Verdict::RequestChanges => "Automated review: changes requested",
    };
    body.push_str(heading);
    body.push_str(&format!(
        "\n\nrisk: {} | confidence: {:.2} | auto-merge: {}\n",
        result.risk.as_str(),
        result.confidence,
        result.auto_merge
    ));

    if !result.reasons.is_empty() {
        body.push_str("\n**Reasons**\n");
        for reason in &result.reasons {
            body.push_str(&format!("- {reason}\n"));
        }
    }
    if !summary.policy.violations.is_empty() {
        body.push_str("\n**Policy violations**\n");
        for violation in &summary.policy.violations {
            body.push_str(&format!(
                "- [{:?}] {}: {}\n",
                violation.severity, violation.kind, violation.message
            ));
        }
    }
    if !summary.llm.code_issues.is_empty() {
        body.push_str("\n**Code issues**\n");
        for issue in &summary.llm.code_issues {
            let location = match (&issue.file, issue.line) {
                (Some(file), Some(line)) => format!(" ({file}:{line})"),
                (Some(file), None) => format!(" ({file})"),
                _ => String::new(),
            };
            body.push_str(&format!(
                "- [{:?}/{}] {}{location}\n",
                issue.severity, issue.category, issue.message
            ));
        }
    }
    if !result.suggestions.is_empty() {
        body.push_str("\n**Suggestions**\n");
        for suggestion in &result.suggestions {
            body.push_str(&format!("- {suggestion}\n"));
        }
    }
    body
}

/// Post the verdict on the PR.
///
/// Self-authored PRs (author == authenticated login) get a plain comment
/// instead of an approving/rejecting review, since forges refuse reviews on
/// one's own PRs.
///
/// # Errors
///
/// Returns an error if the forge rejects both the review and the comment.
pub async fn post_review(
    forge: &Arc<dyn Forge>,
    pr: &PrInfo,
    result: &JudgeResult,
    summary: &EvaluationSummary,
    dry_run: bool,
) -> Result<()> {
    let body = format_review_body(result, summary);
    if dry_run {
        tracing::info!(
            pr = pr.number,
            verdict = result.verdict.as_str(),
            "dry-run: skipping review post"
        );
        return Ok(());
    }

    let self_authored = match forge.authenticated_user().await {
        Ok(login) => login == pr.author,
        Err(e) => {
            tracing::warn!(error = %e, "self-authorship probe failed, assuming not self-authored");
            false
        }
    };

    if self_authored {
        forge
            .add_pr_comment(pr.number, &body)
            .await
            .context("failed to comment on self-authored PR")?;
        return Ok(());
    }

    let event = match result.verdict {
        Verdict::Approve => ReviewEvent::Approve,
        Verdict::RequestChanges => ReviewEvent::RequestChanges,
    };
    forge
        .create_review(pr.number, event, &body)
        .await
        .context("failed to create review")?;
    Ok(())
}

/// Attempt a merge and interpret the outcome.
///
/// The ladder: a direct success is `merged`; "already in progress" defers;
/// a PR that re-fetches as merged is `merged`; otherwise a branch update is
/// requested, deferring on success and sticking (with the update error as
/// the reason) on failure.
///
/// # Errors
///
/// Returns an error only on transport-level forge failures; merge refusals
/// are data, not errors.
pub async fn attempt_merge(
    forge: &Arc<dyn Forge>,
    pr_number: i64,
    method: MergeMethod,
) -> Result<MergeAttempt> {
    let outcome = forge
        .merge_pr(pr_number, method)
        .await
        .context("merge request failed")?;

    if outcome.merged {
        return Ok(MergeAttempt::merged_now());
    }

    let message = outcome.message.to_ascii_lowercase();
    if message.contains("already in progress") || message.contains("merge in progress") {
        return Ok(MergeAttempt::deferred(REASON_MERGE_IN_PROGRESS));
    }

    // The forge may have merged it out from under us (queue race, another
    // instance); trust a re-fetch over the merge response.
    match forge.get_pr(pr_number).await {
        Ok(pr) if pr.merged => return Ok(MergeAttempt::merged_now()),
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(pr = pr_number, error = %e, "post-merge re-fetch failed");
        }
    }

    match forge.update_branch(pr_number).await {
        Ok(()) => Ok(MergeAttempt::deferred(REASON_UPDATE_BRANCH_REQUESTED)),
        Err(e) => Ok(MergeAttempt::stuck(format!(
            "update_branch_failed:{e}; merge said: {}",
            outcome.message
        ))),
    }
}
