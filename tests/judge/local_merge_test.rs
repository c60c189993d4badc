//! Local-mode merge driver: dirty-base recovery and the ff-then-merge path.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use armitage::config::RecoveryMode;
use armitage::judge::local_merge::{merge_into_base, LocalMergeContext};
use armitage::llm::ReviewLlm;
use armitage::policy::ReviewPolicy;
use armitage::store::{NewTask, Store};
use armitage::types::RunStatus;
use armitage::vcs::{GitOutput, MergeOptions, Vcs};

use crate::util::{open_temp_store, test_config, MockLlm};

fn ok(stdout: &str) -> GitOutput {
    GitOutput {
        success: true,
        stdout: stdout.to_owned(),
        stderr: String::new(),
    }
}

fn fail(stderr: &str) -> GitOutput {
    GitOutput {
        success: false,
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

/// Scripted repository double; records every call.
struct MockVcs {
    dirty: Mutex<bool>,
    merge_in_progress: bool,
    ff_succeeds: bool,
    merge_succeeds: bool,
    calls: Mutex<Vec<String>>,
}

impl MockVcs {
    fn clean() -> Self {
        Self {
            dirty: Mutex::new(false),
            merge_in_progress: false,
            ff_succeeds: true,
            merge_succeeds: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn dirty() -> Self {
        Self {
            dirty: Mutex::new(true),
            ..Self::clean()
        }
    }

    fn called(&self, name: &str) {
        self.calls.lock().expect("lock").push(name.to_owned());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Vcs for MockVcs {
    async fn changed_files(&self) -> GitOutput {
        self.called("changed_files");
        if *self.dirty.lock().expect("lock") {
            ok("src/scratch.rs")
        } else {
            ok("")
        }
    }

    async fn working_tree_diff(&self) -> GitOutput {
        self.called("working_tree_diff");
        ok("diff --git a/src/scratch.rs b/src/scratch.rs\n+wip")
    }

    async fn untracked_files(&self) -> GitOutput {
        ok("")
    }

    async fn stash_changes(&self, _message: &str) -> GitOutput {
        self.called("stash");
        *self.dirty.lock().expect("lock") = false;
        ok("Saved working directory")
    }

    async fn latest_stash_ref(&self) -> GitOutput {
        ok("a1b2c3d")
    }

    async fn apply_stash(&self, _stash_ref: &str) -> GitOutput {
        self.called("apply_stash");
        ok("")
    }

    async fn drop_stash(&self, _stash_ref: &str) -> GitOutput {
        ok("")
    }

    async fn stage_all(&self) -> GitOutput {
        self.called("stage_all");
        ok("")
    }

    async fn commit_changes(&self, _message: &str) -> GitOutput {
        self.called("commit");
        ok("")
    }

    async fn is_merge_in_progress(&self) -> GitOutput {
        if self.merge_in_progress {
            ok("MERGE_HEAD")
        } else {
            fail("")
        }
    }

    async fn abort_merge(&self) -> GitOutput {
        self.called("abort_merge");
        ok("")
    }

    async fn checkout_branch(&self, _name: &str) -> GitOutput {
        self.called("checkout");
        ok("")
    }

    async fn reset_hard(&self, _target: &str) -> GitOutput {
        self.called("reset_hard");
        ok("")
    }

    async fn clean_untracked(&self) -> GitOutput {
        self.called("clean");
        *self.dirty.lock().expect("lock") = false;
        ok("")
    }

    async fn merge_branch(&self, _name: &str, options: MergeOptions) -> GitOutput {
        if options.ff_only {
            self.called("merge_ff");
            if self.ff_succeeds {
                ok("Fast-forward")
            } else {
                fail("fatal: Not possible to fast-forward")
            }
        } else {
            self.called("merge");
            if self.merge_succeeds {
                ok("Merge made")
            } else {
                fail("CONFLICT (content): merge conflict in src/lib.rs")
            }
        }
    }

    async fn diff_numstat(&self, _base: &str, _branch: &str) -> GitOutput {
        ok("3\t1\tsrc/lib.rs")
    }

    async fn diff_range(&self, _base: &str, _branch: &str) -> GitOutput {
        ok("diff --git a/src/lib.rs b/src/lib.rs")
    }
}

async fn seed_run(store: &Store) -> String {
    let task_id = store
        .create_task(&NewTask {
            title: "Local candidate".to_owned(),
            goal: "g".to_owned(),
            ..NewTask::default()
        })
        .await
        .expect("task");
    store
        .insert_run(&task_id, RunStatus::Success, &armitage::store::now_rfc3339())
        .await
        .expect("run")
}

#[tokio::test]
async fn clean_base_fast_forwards() {
    let (store, _dir) = open_temp_store().await;
    let run_id = seed_run(&store).await;
    let config = test_config();
    let policy = ReviewPolicy::default();
    let ctx = LocalMergeContext {
        store: &store,
        llm: None,
        config: &config,
        policy: &policy,
        agent_id: "judge-test",
        run_id: &run_id,
    };

    let vcs = MockVcs::clean();
    let outcome = merge_into_base(&ctx, &vcs, "main", "feature/x")
        .await
        .expect("drive");
    assert!(outcome.success);

    let calls = vcs.calls();
    assert!(calls.contains(&"checkout".to_owned()));
    assert!(calls.contains(&"merge_ff".to_owned()));
    assert!(!calls.contains(&"stash".to_owned()));
}

#[tokio::test]
async fn dirty_base_stash_mode_snapshots_and_proceeds() {
    let (store, _dir) = open_temp_store().await;
    let run_id = seed_run(&store).await;
    let mut config = test_config();
    config.local_recovery = RecoveryMode::Stash;
    let policy = ReviewPolicy::default();
    let ctx = LocalMergeContext {
        store: &store,
        llm: None,
        config: &config,
        policy: &policy,
        agent_id: "judge-test",
        run_id: &run_id,
    };

    let mut vcs = MockVcs::dirty();
    vcs.ff_succeeds = false;
    let outcome = merge_into_base(&ctx, &vcs, "main", "feature/x")
        .await
        .expect("drive");
    assert!(outcome.success);

    let calls = vcs.calls();
    assert!(calls.contains(&"stash".to_owned()));
    assert!(calls.contains(&"merge".to_owned()));

    // The diff snapshot exists and the stash was logged.
    let artifacts = store.artifacts_for_run(&run_id).await.expect("artifacts");
    assert!(artifacts
        .iter()
        .any(|a| a.kind == armitage::types::ArtifactKind::BaseRepoDiff));
    let events = store.events_for_entity("run", &run_id).await.expect("events");
    assert!(events.iter().any(|e| e.kind == "judge.base_repo_stashed"));
}

#[tokio::test]
async fn dirty_base_with_recovery_disabled_fails() {
    let (store, _dir) = open_temp_store().await;
    let run_id = seed_run(&store).await;
    let mut config = test_config();
    config.local_recovery = RecoveryMode::None;
    let policy = ReviewPolicy::default();
    let ctx = LocalMergeContext {
        store: &store,
        llm: None,
        config: &config,
        policy: &policy,
        agent_id: "judge-test",
        run_id: &run_id,
    };

    let vcs = MockVcs::dirty();
    let outcome = merge_into_base(&ctx, &vcs, "main", "feature/x")
        .await
        .expect("drive");
    assert!(!outcome.success);
    assert!(outcome.reason.expect("reason").contains("dirty"));
    assert!(!vcs.calls().contains(&"stash".to_owned()));
}

#[tokio::test]
async fn llm_mode_restores_approved_stash() {
    let (store, _dir) = open_temp_store().await;
    let run_id = seed_run(&store).await;
    let mut config = test_config();
    config.local_recovery = RecoveryMode::Llm;
    let policy = ReviewPolicy::default();
    let llm: Arc<dyn ReviewLlm> = Arc::new(MockLlm::passing(0.95));
    let ctx = LocalMergeContext {
        store: &store,
        llm: Some(&llm),
        config: &config,
        policy: &policy,
        agent_id: "judge-test",
        run_id: &run_id,
    };

    let vcs = MockVcs::dirty();
    let outcome = merge_into_base(&ctx, &vcs, "main", "feature/x")
        .await
        .expect("drive");
    assert!(outcome.success);

    let calls = vcs.calls();
    assert!(calls.contains(&"apply_stash".to_owned()));
    assert!(calls.contains(&"stage_all".to_owned()));
    assert!(calls.contains(&"commit".to_owned()));

    let events = store.events_for_entity("run", &run_id).await.expect("events");
    let decision = events
        .iter()
        .find(|e| e.kind == "judge.base_repo_recovery_decision")
        .expect("decision event");
    assert_eq!(decision.payload["restore"], true);
}

#[tokio::test]
async fn conflicting_merge_aborts_and_reports_stderr() {
    let (store, _dir) = open_temp_store().await;
    let run_id = seed_run(&store).await;
    let config = test_config();
    let policy = ReviewPolicy::default();
    let ctx = LocalMergeContext {
        store: &store,
        llm: None,
        config: &config,
        policy: &policy,
        agent_id: "judge-test",
        run_id: &run_id,
    };

    let mut vcs = MockVcs::clean();
    vcs.ff_succeeds = false;
    vcs.merge_succeeds = false;
    let outcome = merge_into_base(&ctx, &vcs, "main", "feature/x")
        .await
        .expect("drive");
    assert!(!outcome.success);
    assert!(outcome.reason.expect("reason").contains("CONFLICT"));
    assert!(vcs.calls().contains(&"abort_merge".to_owned()));
}
