//! Shared fixtures and mock adapters for judge integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use armitage::config::JudgeConfig;
use armitage::forge::{
    CheckContext, CombinedStatus, Forge, ForgeError, MergeMethod, MergeOutcome, PrInfo,
    ReviewEvent,
};
use armitage::llm::{LlmError, ReviewLlm, ReviewRequest};
use armitage::store::{NewArtifact, NewTask, Store};
use armitage::types::{ArtifactKind, BlockReason, ChangedFile, LlmOutcome, RunStatus, TaskStatus};

pub(crate) async fn open_temp_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("judge.db")).await.expect("open store");
    (store, dir)
}

/// Config tuned for tests: zero cooldowns and retry delays so ticks chain.
pub(crate) fn test_config() -> JudgeConfig {
    let mut config = JudgeConfig::from_resolver(|key| match key {
        "DATABASE_PATH" => Some("/tmp/unused.db".to_owned()),
        "AGENT_ID" => Some("judge-test".to_owned()),
        _ => None,
    })
    .expect("config");
    config.awaiting_retry_cooldown = std::time::Duration::from_millis(0);
    config.queue_retry_delay = std::time::Duration::from_millis(0);
    config
}

/// Seed a blocked task with a successful run and a PR artifact.
pub(crate) async fn seed_pr_candidate(
    store: &Store,
    pr_number: i64,
    title: &str,
) -> (String, String) {
    let task_id = store
        .create_task(&NewTask {
            title: title.to_owned(),
            goal: "implement the change".to_owned(),
            ..NewTask::default()
        })
        .await
        .expect("create task");
    store
        .set_task_status(&task_id, TaskStatus::Blocked, Some(BlockReason::AwaitingJudge))
        .await
        .expect("block task");
    let run_id = store
        .insert_run(&task_id, RunStatus::Success, &armitage::store::now_rfc3339())
        .await
        .expect("insert run");
    store
        .insert_artifact(&NewArtifact {
            run_id: run_id.clone(),
            kind: ArtifactKind::Pr,
            reference: pr_number.to_string(),
            url: Some(format!("https://example.test/pull/{pr_number}")),
            metadata: json!({}),
        })
        .await
        .expect("insert artifact");
    (task_id, run_id)
}

/// Scriptable forge double. Every mutating call is recorded.
pub(crate) struct MockForge {
    /// Template PR returned by `get_pr`.
    pub pr: Mutex<PrInfo>,
    /// Files reported for the PR.
    pub files: Vec<ChangedFile>,
    /// Combined CI state; "none" means no contexts at all.
    pub ci_state: String,
    /// Outcomes popped per merge attempt; empty means "not mergeable".
    pub merge_results: Mutex<VecDeque<MergeOutcome>>,
    /// Error message for `update_branch`, if it should fail.
    pub update_branch_error: Option<String>,
    /// Authenticated login.
    pub login: String,
    /// PRs closed.
    pub closed: Mutex<Vec<i64>>,
    /// Reviews created as (pr, event, body).
    pub reviews: Mutex<Vec<(i64, String, String)>>,
    /// Plain comments as (pr, body).
    pub comments: Mutex<Vec<(i64, String)>>,
}

pub(crate) fn pr_info(number: i64) -> PrInfo {
    PrInfo {
        number,
        title: format!("PR {number}"),
        author: "worker-bot".to_owned(),
        head_ref: "feature".to_owned(),
        head_sha: "abc123".to_owned(),
        base_ref: "main".to_owned(),
        state: "open".to_owned(),
        merged: false,
        mergeable: Some(true),
        mergeable_state: Some("clean".to_owned()),
        url: format!("https://example.test/pull/{number}"),
    }
}

impl MockForge {
    pub(crate) fn new(number: i64) -> Self {
        Self {
            pr: Mutex::new(pr_info(number)),
            files: vec![ChangedFile {
                path: "src/lib.rs".to_owned(),
                additions: 20,
                deletions: 5,
            }],
            ci_state: "success".to_owned(),
            merge_results: Mutex::new(VecDeque::new()),
            update_branch_error: None,
            login: "armitage-bot".to_owned(),
            closed: Mutex::new(Vec::new()),
            reviews: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn queue_merge_result(&self, merged: bool, message: &str) {
        self.merge_results
            .lock()
            .expect("lock")
            .push_back(MergeOutcome {
                merged,
                message: message.to_owned(),
            });
    }
}

#[async_trait]
impl Forge for MockForge {
    async fn get_pr(&self, _number: i64) -> Result<PrInfo, ForgeError> {
        Ok(self.pr.lock().expect("lock").clone())
    }

    async fn list_pr_files(&self, _number: i64) -> Result<Vec<ChangedFile>, ForgeError> {
        Ok(self.files.clone())
    }

    async fn pr_diff(&self, _number: i64) -> Result<String, ForgeError> {
        Ok("diff --git a/src/lib.rs b/src/lib.rs\n+change".to_owned())
    }

    async fn combined_status(&self, _sha: &str) -> Result<CombinedStatus, ForgeError> {
        if self.ci_state == "none" {
            return Ok(CombinedStatus {
                state: "pending".to_owned(),
                total_count: 0,
                contexts: vec![],
            });
        }
        Ok(CombinedStatus {
            state: self.ci_state.clone(),
            total_count: 1,
            contexts: vec![CheckContext {
                context: "build".to_owned(),
                state: self.ci_state.clone(),
                description: None,
            }],
        })
    }

    async fn add_pr_comment(&self, number: i64, body: &str) -> Result<(), ForgeError> {
        self.comments
            .lock()
            .expect("lock")
            .push((number, body.to_owned()));
        Ok(())
    }

    async fn create_review(
        &self,
        number: i64,
        event: ReviewEvent,
        body: &str,
    ) -> Result<(), ForgeError> {
        let event = match event {
            ReviewEvent::Approve => "APPROVE",
            ReviewEvent::RequestChanges => "REQUEST_CHANGES",
        };
        self.reviews
            .lock()
            .expect("lock")
            .push((number, event.to_owned(), body.to_owned()));
        Ok(())
    }

    async fn merge_pr(
        &self,
        _number: i64,
        _method: MergeMethod,
    ) -> Result<MergeOutcome, ForgeError> {
        Ok(self
            .merge_results
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(MergeOutcome {
                merged: false,
                message: "Pull Request is not mergeable".to_owned(),
            }))
    }

    async fn update_branch(&self, _number: i64) -> Result<(), ForgeError> {
        match &self.update_branch_error {
            Some(message) => Err(ForgeError::Api {
                status: 422,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn authenticated_user(&self) -> Result<String, ForgeError> {
        Ok(self.login.clone())
    }

    async fn close_pr(&self, number: i64) -> Result<(), ForgeError> {
        self.closed.lock().expect("lock").push(number);
        Ok(())
    }
}

/// Reviewer double returning a fixed outcome (or error).
pub(crate) struct MockLlm {
    /// The outcome every review returns.
    pub outcome: Mutex<Result<LlmOutcome, String>>,
}

impl MockLlm {
    pub(crate) fn passing(confidence: f64) -> Self {
        Self {
            outcome: Mutex::new(Ok(LlmOutcome {
                pass: true,
                confidence,
                reasons: vec![],
                suggestions: vec![],
                code_issues: vec![],
            })),
        }
    }

    pub(crate) fn with_outcome(outcome: LlmOutcome) -> Self {
        Self {
            outcome: Mutex::new(Ok(outcome)),
        }
    }
}

#[async_trait]
impl ReviewLlm for MockLlm {
    async fn review(&self, _request: ReviewRequest) -> Result<LlmOutcome, LlmError> {
        match &*self.outcome.lock().expect("lock") {
            Ok(outcome) => Ok(outcome.clone()),
            Err(message) => Err(LlmError::Parse(message.clone())),
        }
    }
}
