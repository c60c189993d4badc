//! Agent liveness heartbeat and busy/idle transitions.
//!
//! The heartbeat is a background interval task; the busy/idle setters wrap
//! store writes so a liveness failure can never propagate into the main
//! loop — a judge that cannot report being busy should still judge.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::store::Store;
use crate::types::AgentStatus;

/// How often the agent row is refreshed.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

/// Spawn the periodic heartbeat writer. Abort the handle on shutdown.
pub fn spawn_agent_heartbeat(store: Store, agent_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_PERIOD);
        loop {
            interval.tick().await;
            if let Err(e) = store.heartbeat_agent(&agent_id).await {
                tracing::warn!(agent_id = %agent_id, error = %e, "heartbeat write failed");
            }
        }
    })
}

/// Mark the agent busy on a task. Logs and absorbs failures.
pub async fn set_busy(store: &Store, agent_id: &str, task_id: &str) {
    if let Err(e) = store
        .set_agent_status(agent_id, AgentStatus::Busy, Some(task_id))
        .await
    {
        tracing::warn!(agent_id = %agent_id, error = %e, "failed to set agent busy");
    }
}

/// Mark the agent idle. Logs and absorbs failures.
pub async fn set_idle(store: &Store, agent_id: &str) {
    if let Err(e) = store
        .set_agent_status(agent_id, AgentStatus::Idle, None)
        .await
    {
        tracing::warn!(agent_id = %agent_id, error = %e, "failed to set agent idle");
    }
}

/// Mark the agent offline at shutdown. Logs and absorbs failures.
pub async fn set_offline(store: &Store, agent_id: &str) {
    if let Err(e) = store
        .set_agent_status(agent_id, AgentStatus::Offline, None)
        .await
    {
        tracing::warn!(agent_id = %agent_id, error = %e, "failed to set agent offline");
    }
}
