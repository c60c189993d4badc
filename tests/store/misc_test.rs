//! Events, artifacts, and agent rows.

use serde_json::json;

use armitage::store::NewArtifact;
use armitage::types::{AgentStatus, ArtifactKind, EventKind};

use crate::util::{open_temp_store, seed_run, seed_task};

#[tokio::test]
async fn events_append_and_filter_by_kind() {
    let (store, _dir) = open_temp_store().await;
    let task_id = seed_task(&store, "Evented").await;

    store
        .record_event(
            EventKind::Review,
            "task",
            &task_id,
            "judge-test",
            json!({ "verdict": "approve" }),
        )
        .await
        .expect("record");
    store
        .record_event(
            EventKind::TaskRequeued,
            "task",
            &task_id,
            "judge-test",
            json!({ "reason": "merge_deferred" }),
        )
        .await
        .expect("record");

    let events = store.events_for_entity("task", &task_id).await.expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "judge.review");
    assert_eq!(events[1].payload["reason"], "merge_deferred");

    assert!(store
        .has_event(EventKind::Review, "task", &task_id)
        .await
        .expect("has"));
    assert!(!store
        .has_event(EventKind::DocserTaskCreated, "task", &task_id)
        .await
        .expect("has"));
}

#[tokio::test]
async fn artifacts_round_trip_metadata() {
    let (store, _dir) = open_temp_store().await;
    let task_id = seed_task(&store, "Artifacted").await;
    let run_id = seed_run(&store, &task_id).await;

    store
        .insert_artifact(&NewArtifact {
            run_id: run_id.clone(),
            kind: ArtifactKind::Worktree,
            reference: "/tmp/wt".to_owned(),
            url: None,
            metadata: json!({ "branch_name": "feature/x", "base_branch": "main" }),
        })
        .await
        .expect("insert");

    let artifacts = store.artifacts_for_run(&run_id).await.expect("list");
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].kind, ArtifactKind::Worktree);
    assert_eq!(artifacts[0].meta_str("branch_name"), Some("feature/x"));
    assert_eq!(artifacts[0].meta_str("missing"), None);
}

#[tokio::test]
async fn heartbeat_revives_offline_agents_only() {
    let (store, _dir) = open_temp_store().await;
    store.register_agent("judge-1", "judge").await.expect("register");

    // Busy agents stay busy through a heartbeat.
    store
        .set_agent_status("judge-1", AgentStatus::Busy, Some("task-1"))
        .await
        .expect("busy");
    store.heartbeat_agent("judge-1").await.expect("beat");
    let agent = store.get_agent("judge-1").await.expect("agent");
    assert_eq!(agent.status, AgentStatus::Busy);
    assert_eq!(agent.current_task_id.as_deref(), Some("task-1"));

    // Offline agents come back idle.
    store
        .set_agent_status("judge-1", AgentStatus::Offline, None)
        .await
        .expect("offline");
    store.heartbeat_agent("judge-1").await.expect("beat");
    let agent = store.get_agent("judge-1").await.expect("agent");
    assert_eq!(agent.status, AgentStatus::Idle);
    assert!(agent.last_heartbeat.is_some());

    // Registration is idempotent.
    store.register_agent("judge-1", "judge").await.expect("re-register");
}
