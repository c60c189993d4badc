//! The judge control plane.
//!
//! [`Judge`] is the root services struct: configuration, review policy, the
//! store, and the forge/LLM adapters, passed by reference into every phase.
//! The daemon loop ticks through four phases — backlog recovery, merge-queue
//! drain, candidate drains (PRs, worktrees), plugin targets — with a sleep
//! between ticks. No error from one candidate ever terminates a tick; the
//! loop catches at the candidate boundary and the store's conditional
//! updates make every transition safe to retry from another instance.

pub mod actions;
pub mod breakers;
pub mod docser;
pub mod evaluator;
pub mod local_merge;
pub mod merge_queue;
pub mod recovery;
pub mod remediation;
pub mod scanner;
pub mod verdict;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::{JudgeConfig, JudgeMode};
use crate::forge::{Forge, MergeMethod};
use crate::heartbeat;
use crate::llm::ReviewLlm;
use crate::policy::ReviewPolicy;
use crate::store::{Store, TaskRow};
use crate::types::{
    BlockReason, EvaluationSummary, EventKind, JudgeResult, TaskStatus, Verdict,
};
use crate::vcs::{GitRepo, Vcs};

use self::actions::MergeAttempt;
use self::evaluator::CandidateContext;
use self::remediation::{RemediationKind, RemediationNotes, RemediationOutcome};
use self::scanner::{PendingPr, PendingWorktree};

use async_trait::async_trait;

/// A plugin-declared candidate: the narrow capability the loop needs to
/// treat auxiliary kinds (research runs, report generators) uniformly.
#[derive(Debug, Clone)]
pub struct PluginTarget {
    /// Source task id.
    pub task_id: String,
    /// The successful, unjudged run.
    pub run_id: String,
    /// Artifact reference, interpreted by the plugin.
    pub reference: String,
    /// Opaque payload the plugin passes to itself.
    pub payload: serde_json::Value,
}

/// Evaluator for auxiliary candidate kinds.
///
/// The loop owns claiming and the busy/idle envelope; the plugin owns
/// evaluation and verdict application for its targets.
#[async_trait]
pub trait JudgePlugin: Send + Sync {
    /// Artifact kind this plugin judges (used by backlog recovery too).
    fn artifact_kind(&self) -> &str;

    /// Collect pending targets from the store.
    async fn collect_pending_targets(&self, store: &Store) -> Result<Vec<PluginTarget>>;

    /// Evaluate one claimed target and apply its verdict.
    async fn judge_target(&self, judge: &Judge, target: &PluginTarget) -> Result<()>;
}

/// Root services for the judge. Everything is reachable from here; there is
/// no module-level mutable state.
pub struct Judge {
    pub(crate) config: JudgeConfig,
    pub(crate) policy: ReviewPolicy,
    pub(crate) store: Store,
    pub(crate) forge: Option<Arc<dyn Forge>>,
    pub(crate) llm: Option<Arc<dyn ReviewLlm>>,
    pub(crate) plugins: Vec<Arc<dyn JudgePlugin>>,
}

impl Judge {
    /// Create a judge with no adapters attached.
    pub fn new(config: JudgeConfig, policy: ReviewPolicy, store: Store) -> Self {
        Self {
            config,
            policy,
            store,
            forge: None,
            llm: None,
            plugins: Vec::new(),
        }
    }

    /// Attach a forge adapter.
    #[must_use]
    pub fn with_forge(mut self, forge: Arc<dyn Forge>) -> Self {
        self.forge = Some(forge);
        self
    }

    /// Attach a review LLM.
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn ReviewLlm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Register a plugin for an auxiliary candidate kind.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn JudgePlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// The judge's store handle.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The judge's configuration.
    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub(crate) fn forge(&self) -> Result<&Arc<dyn Forge>> {
        self.forge
            .as_ref()
            .context("no forge configured (set GITHUB_REPO and GITHUB_TOKEN)")
    }

    /// The reviewer, unless disabled by `USE_LLM` or unconfigured.
    pub(crate) fn reviewer(&self) -> Option<&Arc<dyn ReviewLlm>> {
        if !self.config.use_llm {
            return None;
        }
        self.llm.as_ref()
    }

    fn merge_method(&self) -> MergeMethod {
        MergeMethod::parse(&self.policy.auto_merge.method)
    }

    // -----------------------------------------------------------------------
    // Daemon loop
    // -----------------------------------------------------------------------

    /// Run the polling daemon until interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if startup registration fails; per-tick errors are
    /// logged and absorbed.
    pub async fn run(&self) -> Result<()> {
        self.store
            .register_agent(&self.config.agent_id, "judge")
            .await?;
        let heartbeat_task =
            heartbeat::spawn_agent_heartbeat(self.store.clone(), self.config.agent_id.clone());

        tracing::info!(
            agent_id = %self.config.agent_id,
            poll_interval = ?self.config.poll_interval,
            dry_run = self.config.dry_run,
            "judge started"
        );

        let mut shutdown = Box::pin(tokio::signal::ctrl_c());
        loop {
            self.tick().await;
            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, stopping after current tick");
                    break;
                }
            }
        }

        heartbeat_task.abort();
        heartbeat::set_offline(&self.store, &self.config.agent_id).await;
        Ok(())
    }

    /// One polling tick: recover, drain the queue, drain candidates, run
    /// plugins. Every phase failure is logged and the tick continues.
    pub async fn tick(&self) {
        let plugin_kinds: Vec<String> = self
            .plugins
            .iter()
            .map(|p| p.artifact_kind().to_owned())
            .collect();

        match recovery::recover_backlog(&self.store, &self.config, &plugin_kinds).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(recovered = n, "backlog recovery re-armed stuck runs"),
            Err(e) => tracing::warn!(error = %e, "backlog recovery failed"),
        }

        if let Err(e) = merge_queue::drain(self).await {
            tracing::warn!(error = %e, "merge-queue drain failed");
        }

        if self.config.mode != JudgeMode::Local && self.forge.is_some() {
            if let Err(e) = self.drain_pr_candidates().await {
                tracing::warn!(error = %e, "pr candidate scan failed");
            }
        }

        if self.config.mode != JudgeMode::Git {
            if let Err(e) = self.drain_worktree_candidates().await {
                tracing::warn!(error = %e, "worktree candidate scan failed");
            }
        }

        if let Err(e) = self.drain_plugin_targets().await {
            tracing::warn!(error = %e, "plugin target scan failed");
        }
    }

    async fn drain_pr_candidates(&self) -> Result<()> {
        for pending in scanner::pending_prs(&self.store).await? {
            if let Err(e) = self.process_pr_candidate(&pending).await {
                tracing::error!(
                    task_id = %pending.task.id,
                    pr = pending.pr_number,
                    error = %format!("{e:#}"),
                    "pr candidate failed"
                );
            }
        }
        Ok(())
    }

    async fn drain_worktree_candidates(&self) -> Result<()> {
        for pending in scanner::pending_worktrees(&self.store, &self.config).await? {
            if let Err(e) = self.process_worktree_candidate(&pending).await {
                tracing::error!(
                    task_id = %pending.task.id,
                    branch = %pending.branch_name,
                    error = %format!("{e:#}"),
                    "worktree candidate failed"
                );
            }
        }
        Ok(())
    }

    async fn drain_plugin_targets(&self) -> Result<()> {
        for plugin in &self.plugins {
            let targets = plugin.collect_pending_targets(&self.store).await?;
            for target in targets {
                if !self.store.claim_run(&target.run_id).await? {
                    continue;
                }
                heartbeat::set_busy(&self.store, &self.config.agent_id, &target.task_id).await;
                let outcome = plugin.judge_target(self, &target).await;
                heartbeat::set_idle(&self.store, &self.config.agent_id).await;
                if let Err(e) = outcome {
                    tracing::error!(
                        kind = plugin.artifact_kind(),
                        task_id = %target.task_id,
                        error = %format!("{e:#}"),
                        "plugin target failed"
                    );
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // PR candidates
    // -----------------------------------------------------------------------

    async fn process_pr_candidate(&self, pending: &PendingPr) -> Result<()> {
        let ctx = CandidateContext::from_task(&pending.task);

        if self.config.dry_run {
            let (summary, _pr, _files) = self.evaluate_pr(pending.pr_number, &ctx).await?;
            let result = verdict::decide(&summary, &self.policy);
            tracing::info!(
                pr = pending.pr_number,
                verdict = result.verdict.as_str(),
                auto_merge = result.auto_merge,
                "dry-run verdict"
            );
            return Ok(());
        }

        if !self.store.claim_run(&pending.run_id).await? {
            tracing::debug!(run_id = %pending.run_id, "run already claimed by another judge");
            return Ok(());
        }

        heartbeat::set_busy(&self.store, &self.config.agent_id, &pending.task.id).await;
        let outcome = self.judge_claimed_pr(pending, &ctx).await;
        heartbeat::set_idle(&self.store, &self.config.agent_id).await;
        outcome
    }

    async fn judge_claimed_pr(&self, pending: &PendingPr, ctx: &CandidateContext) -> Result<()> {
        let label = format!("PR #{}", pending.pr_number);

        let (summary, pr, files) = match self.evaluate_pr(pending.pr_number, ctx).await {
            Ok(v) => v,
            Err(e) => {
                let reason = format!("evaluation_failed: {e:#}");
                self.handle_evaluation_failure(&pending.task, &pending.run_id, &label, &reason)
                    .await?;
                return Err(e);
            }
        };

        // A PR that merged or closed behind our back needs no verdict.
        if pr.merged {
            tracing::info!(pr = pending.pr_number, "pr already merged, completing task");
            self.finish_merged(&pending.task, &files_to_paths(&files), None)
                .await?;
            return Ok(());
        }
        if pr.state != "open" {
            tracing::warn!(pr = pending.pr_number, "pr closed without merge, failing task");
            self.store
                .set_task_status(&pending.task.id, TaskStatus::Failed, None)
                .await?;
            return Ok(());
        }

        // CI still running is neither a pass nor a reviewable failure; wait
        // out the cooldown instead of burning an AutoFix attempt.
        if !summary.ci.pass && summary.ci.status == "pending" {
            self.schedule_judge_retry(
                &pending.task.id,
                &pending.run_id,
                "ci checks still running",
                false,
            )
            .await?;
            return Ok(());
        }

        let result = verdict::decide(&summary, &self.policy);
        self.record_review_event(&pending.task.id, &pending.run_id, Some(pending.pr_number), &result)
            .await?;

        if let Err(e) = actions::post_review(
            self.forge()?,
            &pr,
            &result,
            &summary,
            self.config.dry_run,
        )
        .await
        {
            self.schedule_judge_retry(
                &pending.task.id,
                &pending.run_id,
                &format!("judge_action_error:{e:#}"),
                true,
            )
            .await?;
            return Err(e);
        }

        match result.verdict {
            Verdict::Approve => {
                self.handle_approved_pr(pending, &label, &summary, &result, &files)
                    .await
            }
            Verdict::RequestChanges => {
                self.handle_rejection(
                    &pending.task,
                    &pending.run_id,
                    &label,
                    Some(pending.pr_number),
                    &summary,
                    &result,
                )
                .await
            }
        }
    }

    async fn handle_approved_pr(
        &self,
        pending: &PendingPr,
        label: &str,
        summary: &EvaluationSummary,
        result: &JudgeResult,
        files: &[crate::types::ChangedFile],
    ) -> Result<()> {
        if !result.auto_merge {
            tracing::info!(pr = pending.pr_number, "approved without auto-merge");
            self.store
                .set_task_status(&pending.task.id, TaskStatus::Done, None)
                .await?;
            return Ok(());
        }

        let attempt = match actions::attempt_merge(
            self.forge()?,
            pending.pr_number,
            self.merge_method(),
        )
        .await
        {
            Ok(attempt) => attempt,
            // Transport noise is indistinguishable from a slow forge; treat
            // it as deferred and let the queue retry.
            Err(e) => MergeAttempt {
                merged: false,
                merge_deferred: true,
                reason: Some(format!("merge request error: {e:#}")),
            },
        };

        if attempt.merged {
            tracing::info!(pr = pending.pr_number, "merged");
            self.finish_merged(&pending.task, &files_to_paths(files), None)
                .await?;
            return Ok(());
        }

        let reason = attempt
            .reason
            .unwrap_or_else(|| "merge_incomplete".to_owned());

        if breakers::conflict_signal(&reason) {
            return self
                .escalate_conflict(&pending.task, label, Some(pending.pr_number), &reason, Some(summary))
                .await;
        }

        match self
            .store
            .enqueue_merge(
                pending.pr_number,
                &pending.task.id,
                &pending.run_id,
                pending.task.priority,
                self.config.queue_max_attempts,
            )
            .await?
        {
            crate::store::EnqueueOutcome::Enqueued { id } => {
                self.store
                    .record_event(
                        EventKind::MergeQueueEnqueued,
                        "merge_queue",
                        &id,
                        &self.config.agent_id,
                        json!({ "pr_number": pending.pr_number, "reason": reason }),
                    )
                    .await?;
            }
            // Mirror a terminal existing row into the source task; a live
            // row just means the queue already owns this merge.
            crate::store::EnqueueOutcome::DuplicateSourceRun { status, .. }
                if status == crate::types::QueueItemStatus::Merged =>
            {
                tracing::info!(pr = pending.pr_number, "queue already merged this run");
                self.finish_merged(&pending.task, &files_to_paths(files), None)
                    .await?;
                return Ok(());
            }
            crate::store::EnqueueOutcome::DuplicateSourceRun { status, .. }
                if status == crate::types::QueueItemStatus::Failed =>
            {
                tracing::warn!(pr = pending.pr_number, "queue already failed this run");
                self.store
                    .set_task_status(&pending.task.id, TaskStatus::Failed, None)
                    .await?;
                return Ok(());
            }
            other => {
                tracing::debug!(pr = pending.pr_number, ?other, "merge already queued");
            }
        }

        // The forge needs time to reflect a requested branch sync; leave
        // the run claimed and let backlog recovery re-arm after cooldown.
        let restore_now = reason != actions::REASON_UPDATE_BRANCH_REQUESTED;
        self.schedule_judge_retry(
            &pending.task.id,
            &pending.run_id,
            &format!("merge_deferred: {reason}"),
            restore_now,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Worktree candidates
    // -----------------------------------------------------------------------

    async fn process_worktree_candidate(&self, pending: &PendingWorktree) -> Result<()> {
        let ctx = CandidateContext::from_task(&pending.task);
        let worktree = GitRepo::new(std::path::Path::new(&pending.worktree_path));

        if self.config.dry_run {
            let (summary, _files) = self.evaluate_worktree(&worktree, pending, &ctx).await?;
            let result = verdict::decide(&summary, &self.policy);
            tracing::info!(
                branch = %pending.branch_name,
                verdict = result.verdict.as_str(),
                "dry-run verdict"
            );
            return Ok(());
        }

        if !self.store.claim_run(&pending.run_id).await? {
            return Ok(());
        }

        heartbeat::set_busy(&self.store, &self.config.agent_id, &pending.task.id).await;
        let outcome = self.judge_claimed_worktree(pending, &ctx, &worktree).await;
        heartbeat::set_idle(&self.store, &self.config.agent_id).await;
        outcome
    }

    async fn judge_claimed_worktree(
        &self,
        pending: &PendingWorktree,
        ctx: &CandidateContext,
        worktree: &dyn Vcs,
    ) -> Result<()> {
        let label = format!("branch {}", pending.branch_name);

        let (summary, files) = match self.evaluate_worktree(worktree, pending, ctx).await {
            Ok(v) => v,
            Err(e) => {
                let reason = format!("evaluation_failed: {e:#}");
                self.handle_evaluation_failure(&pending.task, &pending.run_id, &label, &reason)
                    .await?;
                return Err(e);
            }
        };

        let result = verdict::decide(&summary, &self.policy);
        self.record_review_event(&pending.task.id, &pending.run_id, None, &result)
            .await?;

        if result.verdict == Verdict::RequestChanges {
            return self
                .handle_rejection(&pending.task, &pending.run_id, &label, None, &summary, &result)
                .await;
        }

        if !result.auto_merge {
            self.store
                .set_task_status(&pending.task.id, TaskStatus::Done, None)
                .await?;
            return Ok(());
        }

        let base_repo = GitRepo::new(std::path::Path::new(&pending.base_repo_path));
        let merge_ctx = local_merge::LocalMergeContext {
            store: &self.store,
            llm: self.reviewer(),
            config: &self.config,
            policy: &self.policy,
            agent_id: &self.config.agent_id,
            run_id: &pending.run_id,
        };
        let outcome = local_merge::merge_into_base(
            &merge_ctx,
            &base_repo,
            &pending.base_branch,
            &pending.branch_name,
        )
        .await?;

        if outcome.success {
            tracing::info!(branch = %pending.branch_name, base = %pending.base_branch, "merged locally");
            self.finish_merged(
                &pending.task,
                &files_to_paths(&files),
                Some(std::path::Path::new(&pending.base_repo_path)),
            )
            .await?;
            return Ok(());
        }

        let reason = outcome.reason.unwrap_or_else(|| "local merge failed".to_owned());
        if breakers::conflict_signal(&reason) {
            self.escalate_conflict(&pending.task, &label, None, &reason, Some(&summary))
                .await
        } else {
            self.schedule_judge_retry(&pending.task.id, &pending.run_id, &reason, false)
                .await
        }
    }

    // -----------------------------------------------------------------------
    // Rejection routing and escalation
    // -----------------------------------------------------------------------

    /// Route a non-approve verdict per the remediation ladder.
    async fn handle_rejection(
        &self,
        task: &TaskRow,
        run_id: &str,
        label: &str,
        pr_number: Option<i64>,
        summary: &EvaluationSummary,
        result: &JudgeResult,
    ) -> Result<()> {
        let reason = result.reasons.join("; ");

        // Doom-loop breaker: unlimited AutoFix, no more retries.
        if breakers::should_break_doom_loop(summary, task.retry_count, self.config.doom_loop_retries)
        {
            tracing::warn!(task_id = %task.id, label, "doom loop detected, breaking to AutoFix");
            let notes = RemediationNotes {
                latest_retry_reason: Some(reason.clone()),
                ..Default::default()
            };
            self.create_autofix_and_requeue(task, label, summary, &notes, -1, &reason)
                .await?;
            return Ok(());
        }

        if summary.llm_ran || !summary.llm.pass {
            if breakers::has_actionable_llm_failures(summary) {
                let notes = RemediationNotes {
                    latest_retry_reason: Some(reason.clone()),
                    ..Default::default()
                };
                return self
                    .create_autofix_and_requeue(
                        task,
                        label,
                        summary,
                        &notes,
                        self.config.auto_fix_max_attempts,
                        &reason,
                    )
                    .await;
            }

            if breakers::is_non_actionable_llm_failure(summary) {
                // Conflict-flavoured prechecks that keep recurring go to the
                // conflict ladder instead of retrying forever.
                if breakers::conflict_signal(&reason)
                    && breakers::should_break_non_approve(
                        task.retry_count,
                        self.config.non_approve_retries,
                    )
                {
                    return self
                        .escalate_conflict(task, label, pr_number, &reason, Some(summary))
                        .await;
                }
                tracing::info!(
                    task_id = %task.id,
                    label,
                    reason = %reason,
                    "non-actionable LLM failure, scheduling judge retry"
                );
                return self
                    .schedule_judge_retry(&task.id, run_id, &reason, false)
                    .await;
            }
        }

        // CI/policy failure (or a confident LLM failure with no findings).
        if self.config.auto_fix_on_fail
            || breakers::should_break_non_approve(task.retry_count, self.config.non_approve_retries)
        {
            let notes = RemediationNotes {
                previous_failure_reason: Some(reason.clone()),
                ..Default::default()
            };
            self.create_autofix_and_requeue(
                task,
                label,
                summary,
                &notes,
                self.config.auto_fix_max_attempts,
                &reason,
            )
            .await
        } else {
            self.requeue_needs_rework(&task.id, &reason).await
        }
    }

    /// Repeated evaluation failures escalate; early ones retry.
    async fn handle_evaluation_failure(
        &self,
        task: &TaskRow,
        run_id: &str,
        label: &str,
        reason: &str,
    ) -> Result<()> {
        if self.config.auto_fix_on_fail
            && breakers::should_break_non_approve(task.retry_count, self.config.non_approve_retries)
        {
            let notes = RemediationNotes {
                previous_failure_reason: Some(reason.to_owned()),
                ..Default::default()
            };
            let outcome = remediation::ensure_remediation_task(
                &self.store,
                &self.config.agent_id,
                RemediationKind::AutoFix,
                label,
                task,
                None,
                &notes,
                self.config.auto_fix_max_attempts,
            )
            .await?;
            tracing::warn!(
                task_id = %task.id,
                outcome = %outcome.describe(RemediationKind::AutoFix),
                "evaluation kept failing, escalated to AutoFix"
            );
            self.requeue_needs_rework(&task.id, reason).await
        } else {
            self.schedule_judge_retry(&task.id, run_id, reason, false)
                .await
        }
    }

    /// Create (or reuse) an AutoFix task and park the source task in
    /// needs-rework; when the AutoFix budget is spent the task fails.
    async fn create_autofix_and_requeue(
        &self,
        task: &TaskRow,
        label: &str,
        summary: &EvaluationSummary,
        notes: &RemediationNotes,
        max_attempts: i64,
        reason: &str,
    ) -> Result<()> {
        let outcome = remediation::ensure_remediation_task(
            &self.store,
            &self.config.agent_id,
            RemediationKind::AutoFix,
            label,
            task,
            Some(summary),
            notes,
            max_attempts,
        )
        .await?;

        match outcome {
            RemediationOutcome::Created { .. } | RemediationOutcome::ExistingActive { .. } => {
                self.requeue_needs_rework(&task.id, reason).await
            }
            RemediationOutcome::AttemptLimitReached { count, max } => {
                tracing::warn!(
                    task_id = %task.id,
                    label,
                    count,
                    max,
                    "autofix budget exhausted, failing task"
                );
                self.store
                    .set_task_status(&task.id, TaskStatus::Failed, None)
                    .await?;
                Ok(())
            }
        }
    }

    /// Conflict ladder: Conflict-AutoFix, then close + Mainline-Recreate +
    /// task failure on exhaustion.
    pub(crate) async fn escalate_conflict(
        &self,
        task: &TaskRow,
        label: &str,
        pr_number: Option<i64>,
        reason: &str,
        summary: Option<&EvaluationSummary>,
    ) -> Result<()> {
        let notes = RemediationNotes {
            previous_failure_reason: Some(reason.to_owned()),
            ..Default::default()
        };
        let outcome = remediation::ensure_remediation_task(
            &self.store,
            &self.config.agent_id,
            RemediationKind::ConflictAutoFix,
            label,
            task,
            summary,
            &notes,
            self.config.auto_fix_max_attempts,
        )
        .await?;

        match outcome {
            RemediationOutcome::Created { .. } | RemediationOutcome::ExistingActive { .. } => {
                self.requeue_needs_rework(&task.id, reason).await
            }
            RemediationOutcome::AttemptLimitReached { count, max } => {
                let exhausted =
                    RemediationOutcome::AttemptLimitReached { count, max }
                        .describe(RemediationKind::ConflictAutoFix);
                tracing::warn!(task_id = %task.id, label, %exhausted, "conflict ladder exhausted");

                if let Some(number) = pr_number {
                    if self.config.dry_run {
                        tracing::info!(pr = number, "dry-run: skipping PR close");
                    } else if let Ok(forge) = self.forge() {
                        if let Err(e) = forge.close_pr(number).await {
                            tracing::warn!(pr = number, error = %e, "failed to close conflicted PR");
                        }
                    }
                }

                let recreate_notes = RemediationNotes {
                    previous_failure_reason: Some(reason.to_owned()),
                    latest_autofix_failure_reason: Some(exhausted),
                    ..Default::default()
                };
                let recreate = remediation::ensure_remediation_task(
                    &self.store,
                    &self.config.agent_id,
                    RemediationKind::MainlineRecreate,
                    label,
                    task,
                    summary,
                    &recreate_notes,
                    self.config.auto_fix_max_attempts,
                )
                .await?;
                tracing::info!(
                    task_id = %task.id,
                    outcome = %recreate.describe(RemediationKind::MainlineRecreate),
                    "mainline recreate requested"
                );

                self.store
                    .set_task_status(&task.id, TaskStatus::Failed, None)
                    .await?;
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shared transitions
    // -----------------------------------------------------------------------

    /// Park the task in needs-rework, incrementing its retry count.
    pub(crate) async fn requeue_needs_rework(&self, task_id: &str, reason: &str) -> Result<()> {
        self.store
            .block_task_with_retry(task_id, BlockReason::NeedsRework)
            .await?;
        self.store
            .record_event(
                EventKind::TaskRequeued,
                "task",
                task_id,
                &self.config.agent_id,
                json!({ "reason": reason, "block_reason": "needs_rework" }),
            )
            .await?;
        Ok(())
    }

    /// Park the task in awaiting-judge, optionally re-arming the run right
    /// away. When not re-armed, backlog recovery will do it after cooldown.
    pub(crate) async fn schedule_judge_retry(
        &self,
        task_id: &str,
        run_id: &str,
        reason: &str,
        restore_run_immediately: bool,
    ) -> Result<()> {
        self.store
            .block_task_with_retry(task_id, BlockReason::AwaitingJudge)
            .await?;
        let restored = restore_run_immediately && self.store.rearm_run(run_id).await?;
        self.store
            .record_event(
                EventKind::TaskRequeued,
                "task",
                task_id,
                &self.config.agent_id,
                json!({
                    "reason": reason,
                    "block_reason": "awaiting_judge",
                    "run_restored": restored,
                }),
            )
            .await?;
        Ok(())
    }

    /// Complete a merged candidate: task done plus the docser follow-up.
    pub(crate) async fn finish_merged(
        &self,
        task: &TaskRow,
        changed_paths: &[String],
        repo_root: Option<&std::path::Path>,
    ) -> Result<()> {
        self.store
            .set_task_status(&task.id, TaskStatus::Done, None)
            .await?;
        docser::maybe_create_docser_task(
            &self.store,
            &self.policy,
            &self.config.agent_id,
            repo_root,
            task,
            changed_paths,
        )
        .await?;
        Ok(())
    }

    async fn record_review_event(
        &self,
        task_id: &str,
        run_id: &str,
        pr_number: Option<i64>,
        result: &JudgeResult,
    ) -> Result<()> {
        self.store
            .record_event(
                EventKind::Review,
                "task",
                task_id,
                &self.config.agent_id,
                json!({
                    "run_id": run_id,
                    "pr_number": pr_number,
                    "verdict": result.verdict.as_str(),
                    "auto_merge": result.auto_merge,
                    "confidence": result.confidence,
                    "risk": result.risk.as_str(),
                    "reasons": result.reasons,
                }),
            )
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // One-shot mode
    // -----------------------------------------------------------------------

    /// Review a single PR outside the task pipeline and post the verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if the forge is unavailable or evaluation fails.
    pub async fn review_single_pr(&self, pr_number: i64) -> Result<JudgeResult> {
        let ctx = CandidateContext::default();
        let (summary, pr, _files) = self.evaluate_pr(pr_number, &ctx).await?;
        let result = verdict::decide(&summary, &self.policy);
        tracing::info!(
            pr = pr_number,
            verdict = result.verdict.as_str(),
            confidence = result.confidence,
            reasons = ?result.reasons,
            "single-pr verdict"
        );
        actions::post_review(self.forge()?, &pr, &result, &summary, self.config.dry_run).await?;
        Ok(result)
    }
}

/// Project changed-file stats down to their paths.
fn files_to_paths(files: &[crate::types::ChangedFile]) -> Vec<String> {
    files.iter().map(|f| f.path.clone()).collect()
}
