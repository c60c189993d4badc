//! Evaluator orchestrator: compose CI, policy, and LLM results into one
//! [`EvaluationSummary`].
//!
//! The LLM is the expensive, fallible stage, so it only runs when CI and
//! policy already pass and — for PRs — a mergeability precheck confirms the
//! branch is not in a broken state. Everything the LLM skips is a synthetic
//! outcome carrying a reason, never an error.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::forge::{CombinedStatus, PrInfo};
use crate::llm::{ReviewLlm, ReviewRequest};
use crate::policy::{diff_risk, evaluate_policy};
use crate::types::{ChangedFile, CiOutcome, EvaluationSummary, LlmOutcome, RiskLevel};
use crate::vcs::{parse_numstat, Vcs};

use super::scanner::PendingWorktree;
use super::Judge;

/// Deadline for a code review call.
const LLM_REVIEW_TIMEOUT: Duration = Duration::from_secs(300);

/// Character cap on the diff included in the review prompt.
const MAX_DIFF_CHARS: usize = 80_000;

/// Task-side inputs to an evaluation, independent of candidate kind.
#[derive(Debug, Clone, Default)]
pub struct CandidateContext {
    /// The task goal, given to the reviewer.
    pub goal: String,
    /// Task-declared risk.
    pub risk: RiskLevel,
    /// Allowed path globs.
    pub allowed_paths: Vec<String>,
    /// Denied command patterns.
    pub denied_commands: Vec<String>,
    /// Verification commands.
    pub verify_commands: Vec<String>,
}

/// Build the review prompt from a diff and its statistics.
fn build_review_prompt(diff: &str, files: &[ChangedFile]) -> String {
    let truncated = diff.len() > MAX_DIFF_CHARS;
    let body: String = diff.chars().take(MAX_DIFF_CHARS).collect();
    let mut prompt = String::new();
    prompt.push_str("Changed files:\n");
    for file in files {
        prompt.push_str(&format!(
            "- {} (+{} -{})\n",
            file.path, file.additions, file.deletions
        ));
    }
    prompt.push_str("\nDiff:\n");
    prompt.push_str(&body);
    if truncated {
        prompt.push_str("\n[diff truncated]");
    }
    prompt
}

/// Fold a forge combined status into a CI outcome.
///
/// No contexts at all counts as passing: the repository simply has no CI
/// wired to this check surface.
pub fn ci_outcome_from_status(status: &CombinedStatus) -> CiOutcome {
    if status.total_count == 0 {
        return CiOutcome::passing("none");
    }
    match status.state.as_str() {
        "success" => CiOutcome::passing("success"),
        "pending" => CiOutcome {
            pass: false,
            status: "pending".to_owned(),
            reasons: vec!["ci checks still running".to_owned()],
            suggestions: vec!["wait for CI to finish".to_owned()],
            details: context_details(status),
        },
        other => CiOutcome {
            pass: false,
            status: other.to_owned(),
            reasons: status
                .contexts
                .iter()
                .filter(|c| c.state == "failure" || c.state == "error")
                .map(|c| format!("ci: {} {}", c.context, c.state))
                .collect(),
            suggestions: vec!["fix the failing checks".to_owned()],
            details: context_details(status),
        },
    }
}

fn context_details(status: &CombinedStatus) -> Vec<String> {
    status
        .contexts
        .iter()
        .map(|c| {
            format!(
                "{}: {}{}",
                c.context,
                c.state,
                c.description
                    .as_deref()
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            )
        })
        .collect()
}

/// Mergeability precheck for a PR. Returns a synthetic LLM outcome when the
/// branch is in a state where spending a review would be wasted.
pub fn mergeability_precheck(pr: &PrInfo) -> Option<LlmOutcome> {
    let state = pr.mergeable_state.as_deref().unwrap_or("");
    if pr.mergeable == Some(false) || state == "dirty" {
        return Some(LlmOutcome {
            pass: false,
            confidence: 0.0,
            reasons: vec![format!(
                "pr_merge_conflict_detected: mergeable_state={}",
                if state.is_empty() { "unknown" } else { state }
            )],
            suggestions: vec![],
            code_issues: vec![],
        });
    }
    if state == "behind" {
        return Some(LlmOutcome {
            pass: false,
            confidence: 0.0,
            reasons: vec!["pr_base_behind: branch needs an update from its base".to_owned()],
            suggestions: vec![],
            code_issues: vec![],
        });
    }
    None
}

/// Run the reviewer over a diff, folding every failure mode into an outcome.
async fn run_llm_review(
    llm: &dyn ReviewLlm,
    diff: &str,
    files: &[ChangedFile],
    goal: &str,
) -> LlmOutcome {
    let request = ReviewRequest {
        prompt: build_review_prompt(diff, files),
        goal: goal.to_owned(),
        instructions_path: None,
        timeout: LLM_REVIEW_TIMEOUT,
    };
    match llm.review(request).await {
        Ok(outcome) => outcome,
        Err(e) => LlmOutcome {
            pass: false,
            confidence: 0.0,
            reasons: vec![format!("llm review failed: {e}")],
            suggestions: vec![],
            code_issues: vec![],
        },
    }
}

impl Judge {
    /// Evaluate a PR candidate. Returns the summary, the PR metadata, and
    /// the changed-file list (reused by the docser trigger).
    ///
    /// # Errors
    ///
    /// Returns an error when the forge cannot supply the PR or its diff
    /// statistics; those are judge-retry conditions, not verdicts.
    pub async fn evaluate_pr(
        &self,
        pr_number: i64,
        ctx: &CandidateContext,
    ) -> Result<(EvaluationSummary, PrInfo, Vec<ChangedFile>)> {
        let forge = self.forge()?;
        let pr = forge
            .get_pr(pr_number)
            .await
            .with_context(|| format!("failed to fetch PR #{pr_number}"))?;
        let files = forge
            .list_pr_files(pr_number)
            .await
            .with_context(|| format!("failed to list files for PR #{pr_number}"))?;

        let status = forge
            .combined_status(&pr.head_sha)
            .await
            .with_context(|| format!("failed to fetch CI status for PR #{pr_number}"))?;
        let ci = ci_outcome_from_status(&status);

        let policy_outcome = evaluate_policy(
            &self.policy,
            &files,
            &ctx.allowed_paths,
            &ctx.denied_commands,
            &ctx.verify_commands,
        );
        let risk = ctx.risk.max(diff_risk(&self.policy, &files));

        let (llm, llm_ran) = if !ci.pass {
            (LlmOutcome::skipped("ci failed, review not run"), false)
        } else if !policy_outcome.pass {
            (LlmOutcome::skipped("policy failed, review not run"), false)
        } else if let Some(precheck) = mergeability_precheck(&pr) {
            (precheck, false)
        } else {
            match self.reviewer() {
                Some(llm_adapter) => {
                    let diff = forge
                        .pr_diff(pr_number)
                        .await
                        .with_context(|| format!("failed to fetch diff for PR #{pr_number}"))?;
                    (
                        run_llm_review(llm_adapter.as_ref(), &diff, &files, &ctx.goal).await,
                        true,
                    )
                }
                None => (LlmOutcome::skipped("llm review disabled"), false),
            }
        };

        Ok((
            EvaluationSummary {
                ci,
                policy: policy_outcome,
                llm,
                llm_ran,
                risk,
            },
            pr,
            files,
        ))
    }

    /// Evaluate a worktree candidate against its base repository.
    ///
    /// CI is external to the local loop, so it always passes here; policy
    /// and review run over the branch diff.
    ///
    /// # Errors
    ///
    /// Returns an error when the diff cannot be computed.
    pub async fn evaluate_worktree(
        &self,
        vcs: &dyn Vcs,
        pending: &PendingWorktree,
        ctx: &CandidateContext,
    ) -> Result<(EvaluationSummary, Vec<ChangedFile>)> {
        let numstat = vcs
            .diff_numstat(&pending.base_branch, &pending.branch_name)
            .await;
        if !numstat.success {
            anyhow::bail!(
                "failed to diff {}...{}: {}",
                pending.base_branch,
                pending.branch_name,
                numstat.message()
            );
        }
        let files = parse_numstat(&numstat.stdout);

        let ci = CiOutcome::passing("local");
        let policy_outcome = evaluate_policy(
            &self.policy,
            &files,
            &ctx.allowed_paths,
            &ctx.denied_commands,
            &ctx.verify_commands,
        );
        let risk = ctx.risk.max(diff_risk(&self.policy, &files));

        let (llm, llm_ran) = if !policy_outcome.pass {
            (LlmOutcome::skipped("policy failed, review not run"), false)
        } else {
            match self.reviewer() {
                Some(llm_adapter) => {
                    let diff = vcs
                        .diff_range(&pending.base_branch, &pending.branch_name)
                        .await;
                    if !diff.success {
                        anyhow::bail!(
                            "failed to read diff {}...{}: {}",
                            pending.base_branch,
                            pending.branch_name,
                            diff.message()
                        );
                    }
                    (
                        run_llm_review(llm_adapter.as_ref(), &diff.stdout, &files, &ctx.goal)
                            .await,
                        true,
                    )
                }
                None => (LlmOutcome::skipped("llm review disabled"), false),
            }
        };

        Ok((
            EvaluationSummary {
                ci,
                policy: policy_outcome,
                llm,
                llm_ran,
                risk,
            },
            files,
        ))
    }
}

impl CandidateContext {
    /// Build the context from a task row.
    pub fn from_task(task: &crate::store::TaskRow) -> Self {
        Self {
            goal: task.goal.clone(),
            risk: task.risk_level,
            allowed_paths: task.allowed_paths.clone(),
            denied_commands: task.denied_commands.clone(),
            verify_commands: task.verify_commands.clone(),
        }
    }
}
