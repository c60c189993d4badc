//! Local-mode merge driver.
//!
//! Merges a worktree's feature branch into the base repository. The
//! dangerous part is a dirty base: uncommitted work in the base repo blocks
//! any merge, and simply discarding it could destroy something a human (or
//! another agent) left behind. The driver therefore snapshots the diff as an
//! artifact, stashes, and — in `llm` recovery mode — asks the reviewer
//! whether the stash deserves to be restored and committed before the merge
//! proceeds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use crate::config::{JudgeConfig, RecoveryMode};
use crate::llm::{ReviewLlm, ReviewRequest};
use crate::policy::ReviewPolicy;
use crate::store::{NewArtifact, Store};
use crate::types::{ArtifactKind, EventKind, IssueSeverity, LlmOutcome};
use crate::vcs::{MergeOptions, Vcs};

/// Deadline for the stash-restore LLM decision.
const RECOVERY_LLM_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of a local merge attempt.
#[derive(Debug, Clone)]
pub struct LocalMergeOutcome {
    /// Whether the branch is now merged into the base.
    pub success: bool,
    /// Failure reason, when not successful.
    pub reason: Option<String>,
}

impl LocalMergeOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    fn fail(reason: String) -> Self {
        Self {
            success: false,
            reason: Some(reason),
        }
    }
}

/// Everything the driver needs besides the repository itself.
pub struct LocalMergeContext<'a> {
    /// The judge state store (diff artifacts, audit events).
    pub store: &'a Store,
    /// Reviewer for `llm` recovery mode; `None` degrades to stash mode.
    pub llm: Option<&'a Arc<dyn ReviewLlm>>,
    /// Judge configuration (recovery mode, confidence floor, diff cap).
    pub config: &'a JudgeConfig,
    /// Review policy (severity rules for restoration).
    pub policy: &'a ReviewPolicy,
    /// Acting agent id for events.
    pub agent_id: &'a str,
    /// The candidate run the base-repo diff artifact attaches to.
    pub run_id: &'a str,
}

/// Whether a stash-restore decision permits restoration.
pub fn restore_allowed(outcome: &LlmOutcome, policy: &ReviewPolicy, min_confidence: f64) -> bool {
    if !outcome.pass || outcome.confidence < min_confidence {
        return false;
    }
    if policy.recovery.block_on_error_issues
        && outcome
            .code_issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    {
        return false;
    }
    if policy.recovery.block_on_warning_issues
        && outcome
            .code_issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Warning)
    {
        return false;
    }
    true
}

/// Merge `branch_name` into `base_branch` inside the base repository,
/// recovering a dirty base first.
///
/// # Errors
///
/// Returns an error only on store failures; VCS and LLM problems are folded
/// into the returned outcome so the caller can requeue the candidate.
pub async fn merge_into_base(
    ctx: &LocalMergeContext<'_>,
    vcs: &dyn Vcs,
    base_branch: &str,
    branch_name: &str,
) -> Result<LocalMergeOutcome> {
    // A merge left half-done by a crashed process blocks everything else.
    if vcs.is_merge_in_progress().await.success {
        let abort = vcs.abort_merge().await;
        if !abort.success {
            return Ok(LocalMergeOutcome::fail(format!(
                "could not abort in-progress merge: {}",
                abort.message()
            )));
        }
        tracing::warn!("aborted an in-progress merge left in the base repo");
    }

    let status = vcs.changed_files().await;
    if !status.success {
        return Ok(LocalMergeOutcome::fail(format!(
            "status check failed: {}",
            status.message()
        )));
    }
    if !status.stdout.is_empty() {
        if let Some(outcome) = recover_dirty_base(ctx, vcs).await? {
            return Ok(outcome);
        }
    }

    let checkout = vcs.checkout_branch(base_branch).await;
    if !checkout.success {
        return Ok(LocalMergeOutcome::fail(format!(
            "checkout {base_branch} failed: {}",
            checkout.message()
        )));
    }

    let ff = vcs
        .merge_branch(
            branch_name,
            MergeOptions {
                ff_only: true,
                no_edit: false,
            },
        )
        .await;
    if ff.success {
        return Ok(LocalMergeOutcome::ok());
    }

    let merge = vcs
        .merge_branch(
            branch_name,
            MergeOptions {
                ff_only: false,
                no_edit: true,
            },
        )
        .await;
    if merge.success {
        return Ok(LocalMergeOutcome::ok());
    }

    let abort = vcs.abort_merge().await;
    if !abort.success {
        tracing::warn!(error = %abort.message(), "merge abort after failed merge also failed");
    }
    Ok(LocalMergeOutcome::fail(format!(
        "merge of {branch_name} failed: {}",
        merge.message()
    )))
}

/// Run dirty-base recovery. Returns `Some(outcome)` when the merge must stop
/// here, `None` when the base is clean and the merge may proceed.
async fn recover_dirty_base(
    ctx: &LocalMergeContext<'_>,
    vcs: &dyn Vcs,
) -> Result<Option<LocalMergeOutcome>> {
    if ctx.config.local_recovery == RecoveryMode::None {
        return Ok(Some(LocalMergeOutcome::fail(
            "base repository is dirty and recovery is disabled".to_owned(),
        )));
    }

    // Snapshot the diff before anything destructive happens.
    let diff = vcs.working_tree_diff().await;
    let limit = ctx.config.local_recovery_diff_limit;
    let snapshot: String = diff.stdout.chars().take(limit).collect();
    let truncated = snapshot.len() < diff.stdout.len();
    ctx.store
        .insert_artifact(&NewArtifact {
            run_id: ctx.run_id.to_owned(),
            kind: ArtifactKind::BaseRepoDiff,
            reference: format!("dirty-base-{}", crate::store::now_rfc3339()),
            url: None,
            metadata: json!({
                "diff": snapshot,
                "truncated": truncated,
                "original_bytes": diff.stdout.len(),
            }),
        })
        .await?;

    let stash_message = format!("armitage dirty-base stash {}", crate::store::now_rfc3339());
    let stash = vcs.stash_changes(&stash_message).await;
    if !stash.success {
        return Ok(Some(LocalMergeOutcome::fail(format!(
            "stash failed: {}",
            stash.message()
        ))));
    }
    let stash_ref = vcs.latest_stash_ref().await.stdout;
    ctx.store
        .record_event(
            EventKind::BaseRepoStashed,
            "run",
            ctx.run_id,
            ctx.agent_id,
            json!({ "stash_ref": stash_ref, "truncated": truncated }),
        )
        .await?;

    if ctx.config.local_recovery == RecoveryMode::Llm {
        restore_stash_if_approved(ctx, vcs, &snapshot, &stash_ref).await?;
    }

    // Whatever mode ran, the base must be clean now.
    let status = vcs.changed_files().await;
    if !status.stdout.is_empty() {
        let clean = vcs.clean_untracked().await;
        if !clean.success {
            tracing::warn!(error = %clean.message(), "clean after recovery failed");
        }
        let status = vcs.changed_files().await;
        if !status.stdout.is_empty() {
            return Ok(Some(LocalMergeOutcome::fail(
                "base repository still dirty after recovery".to_owned(),
            )));
        }
    }
    Ok(None)
}

/// Ask the reviewer whether the stashed diff should be restored; on
/// approval, apply/stage/commit it, rolling back hard if any step fails.
async fn restore_stash_if_approved(
    ctx: &LocalMergeContext<'_>,
    vcs: &dyn Vcs,
    snapshot: &str,
    stash_ref: &str,
) -> Result<()> {
    let Some(llm) = ctx.llm else {
        tracing::info!("no reviewer available, leaving base-repo work stashed");
        return Ok(());
    };

    let decision = llm
        .review(ReviewRequest {
            prompt: format!(
                "The following uncommitted changes were found in a shared base repository \
                 and have been stashed. Decide whether they are coherent, intentional work \
                 that should be restored and committed, or debris that should stay stashed. \
                 pass=true means restore.\n\n{snapshot}"
            ),
            goal: "judge stashed base-repository changes".to_owned(),
            instructions_path: None,
            timeout: RECOVERY_LLM_TIMEOUT,
        })
        .await;

    let (restore, outcome) = match decision {
        Ok(outcome) => (
            restore_allowed(&outcome, ctx.policy, ctx.config.local_recovery_confidence),
            Some(outcome),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "stash-restore review failed, leaving work stashed");
            (false, None)
        }
    };

    ctx.store
        .record_event(
            EventKind::BaseRepoRecoveryDecision,
            "run",
            ctx.run_id,
            ctx.agent_id,
            json!({
                "restore": restore,
                "stash_ref": stash_ref,
                "confidence": outcome.as_ref().map(|o| o.confidence),
                "reasons": outcome.as_ref().map(|o| o.reasons.clone()),
            }),
        )
        .await?;

    if !restore {
        return Ok(());
    }

    let apply = vcs.apply_stash(stash_ref).await;
    if apply.success {
        let stage = vcs.stage_all().await;
        if stage.success {
            let commit = vcs
                .commit_changes(&format!(
                    "Restore stashed base-repo work ({})",
                    crate::store::now_rfc3339()
                ))
                .await;
            if commit.success {
                tracing::info!(stash_ref, "stashed base-repo work restored and committed");
                return Ok(());
            }
        }
    }

    // Any failure on the apply/stage/commit path leaves an unknown tree;
    // reset to the last commit and drop untracked leftovers. The stash
    // itself is kept for manual inspection.
    tracing::warn!(stash_ref, "stash restoration failed, resetting base repo");
    let reset = vcs.reset_hard("HEAD").await;
    if !reset.success {
        tracing::warn!(error = %reset.message(), "reset after failed restoration also failed");
    }
    let clean = vcs.clean_untracked().await;
    if !clean.success {
        tracing::warn!(error = %clean.message(), "clean after failed restoration also failed");
    }
    Ok(())
}
