//! Shared fixtures for store integration tests.

use armitage::store::{NewTask, Store};
use armitage::types::RunStatus;

pub(crate) async fn open_temp_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("judge.db")).await.expect("open store");
    (store, dir)
}

pub(crate) async fn seed_task(store: &Store, title: &str) -> String {
    store
        .create_task(&NewTask {
            title: title.to_owned(),
            goal: "goal".to_owned(),
            ..NewTask::default()
        })
        .await
        .expect("create task")
}

pub(crate) async fn seed_run(store: &Store, task_id: &str) -> String {
    store
        .insert_run(task_id, RunStatus::Success, &armitage::store::now_rfc3339())
        .await
        .expect("insert run")
}
