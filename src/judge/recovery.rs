//! Awaiting-judge backlog recovery.
//!
//! A judge that crashes between claiming a run and updating the task leaves
//! the task parked in `blocked/awaiting_judge` with its only successful run
//! claimed forever. After a cooldown, this pass finds such tasks, re-arms
//! their most recent judgeable run, and lets the next scan pick them up.

use anyhow::Result;
use serde_json::json;

use crate::config::JudgeConfig;
use crate::store::{to_rfc3339, Store};
use crate::types::EventKind;

/// Artifact kinds that make a run judgeable, beyond plugin-declared ones.
const BUILTIN_JUDGEABLE_KINDS: &[&str] = &["pr", "worktree"];

/// Recover stuck awaiting-judge tasks. Returns how many runs were re-armed.
///
/// # Errors
///
/// Returns an error if a store operation fails.
pub async fn recover_backlog(
    store: &Store,
    config: &JudgeConfig,
    plugin_kinds: &[String],
) -> Result<usize> {
    let cooldown = chrono::Duration::from_std(config.awaiting_retry_cooldown)
        .unwrap_or_else(|_| chrono::Duration::seconds(120));
    let now = chrono::Utc::now();
    let cutoff = to_rfc3339(now.checked_sub_signed(cooldown).unwrap_or(now));

    let mut kinds: Vec<&str> = BUILTIN_JUDGEABLE_KINDS.to_vec();
    kinds.extend(plugin_kinds.iter().map(String::as_str));

    let mut recovered = 0usize;
    for task in store.stale_awaiting_judge_tasks(&cutoff).await? {
        // A run already pending judgement will be scanned normally.
        if store.pending_judgement_run_exists(&task.id).await? {
            continue;
        }
        let Some(run) = store.latest_judgeable_run(&task.id, &kinds).await? else {
            continue;
        };
        if !store.rearm_run(&run.id).await? {
            // Someone else re-armed (and possibly re-claimed) it first.
            continue;
        }
        store
            .record_event(
                EventKind::TaskRecovered,
                "task",
                &task.id,
                &config.agent_id,
                json!({ "run_id": run.id, "stale_since": task.updated_at }),
            )
            .await?;
        tracing::info!(task_id = %task.id, run_id = %run.id, "re-armed stuck awaiting-judge run");
        recovered = recovered.saturating_add(1);
    }
    Ok(recovered)
}
