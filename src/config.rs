//! Judge configuration from environment variables.
//!
//! Everything operational is an env var (with `.env` support via `dotenvy` at
//! the binary entry point); the review policy lives in a separate TOML file
//! (see [`crate::policy`]). Overrides take a resolver function so tests can
//! inject values without touching the process environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default inter-tick sleep.
const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;
/// Default cooldown before an `awaiting_judge` task is retried or recovered.
const DEFAULT_AWAITING_RETRY_COOLDOWN_MS: u64 = 120_000;
/// Default merge-queue claim lease.
const DEFAULT_QUEUE_CLAIM_TTL_MS: u64 = 120_000;
/// Default merge-queue retry delay.
const DEFAULT_QUEUE_RETRY_DELAY_MS: u64 = 30_000;
/// Default merge-queue attempt budget.
const DEFAULT_QUEUE_MAX_ATTEMPTS: i64 = 3;
/// Default auto-fix attempt budget (negative means unlimited).
const DEFAULT_AUTO_FIX_MAX_ATTEMPTS: i64 = 3;
/// Default retry threshold for the doom-loop circuit breaker.
const DEFAULT_DOOM_LOOP_RETRIES: i64 = 2;
/// Default retry threshold for the legacy non-approve circuit breaker.
const DEFAULT_NON_APPROVE_RETRIES: i64 = 2;
/// Default minimum confidence for an LLM-gated stash restore.
const DEFAULT_RECOVERY_CONFIDENCE: f64 = 0.8;
/// Default character cap on persisted base-repo diffs.
const DEFAULT_RECOVERY_DIFF_LIMIT: usize = 20_000;
/// Default review model.
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
/// Default base branch for worktree candidates missing metadata.
const DEFAULT_BASE_BRANCH: &str = "main";

/// Which candidate sources the judge drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeMode {
    /// Forge PRs only.
    Git,
    /// Local worktrees only.
    Local,
    /// Both, as available.
    Auto,
}

impl JudgeMode {
    /// Parse from the `JUDGE_MODE` env value.
    fn parse(s: &str) -> Option<Self> {
        match s {
            "git" => Some(Self::Git),
            "local" => Some(Self::Local),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// How a dirty base repository is recovered before a local merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Stash, then ask the LLM whether the stash should be restored.
    Llm,
    /// Stash and leave it stashed.
    Stash,
    /// Refuse to touch a dirty base.
    None,
}

impl RecoveryMode {
    /// Parse from the `JUDGE_LOCAL_BASE_REPO_RECOVERY` env value.
    fn parse(s: &str) -> Option<Self> {
        match s {
            "llm" => Some(Self::Llm),
            "stash" => Some(Self::Stash),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Full judge configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// This judge instance's agent id (`AGENT_ID`).
    pub agent_id: String,
    /// Inter-tick sleep (`POLL_INTERVAL_MS`).
    pub poll_interval: Duration,
    /// Whether the LLM review runs at all (`USE_LLM`).
    pub use_llm: bool,
    /// Evaluate but mutate nothing (`DRY_RUN`).
    pub dry_run: bool,
    /// Candidate sources to drain (`JUDGE_MODE`).
    pub mode: JudgeMode,
    /// Review model id (`JUDGE_MODEL`).
    pub model: String,
    /// Create AutoFix tasks on CI/policy/LLM failure (`JUDGE_AUTO_FIX_ON_FAIL`).
    pub auto_fix_on_fail: bool,
    /// AutoFix attempt budget; negative means unlimited
    /// (`JUDGE_AUTO_FIX_MAX_ATTEMPTS`).
    pub auto_fix_max_attempts: i64,
    /// Retry threshold for the doom-loop breaker
    /// (`JUDGE_DOOM_LOOP_CIRCUIT_BREAKER_RETRIES`).
    pub doom_loop_retries: i64,
    /// Retry threshold for the legacy non-approve breaker
    /// (`JUDGE_NON_APPROVE_CIRCUIT_BREAKER_RETRIES`).
    pub non_approve_retries: i64,
    /// Cooldown before awaiting-judge retries and backlog recovery
    /// (`JUDGE_AWAITING_RETRY_COOLDOWN_MS`).
    pub awaiting_retry_cooldown: Duration,
    /// Merge-queue claim lease (`JUDGE_MERGE_QUEUE_CLAIM_TTL_MS`).
    pub queue_claim_ttl: Duration,
    /// Merge-queue attempt budget (`JUDGE_MERGE_QUEUE_MAX_ATTEMPTS`).
    pub queue_max_attempts: i64,
    /// Merge-queue retry delay (`JUDGE_MERGE_QUEUE_RETRY_DELAY_MS`).
    pub queue_retry_delay: Duration,
    /// Dirty-base recovery mode (`JUDGE_LOCAL_BASE_REPO_RECOVERY`).
    pub local_recovery: RecoveryMode,
    /// Minimum LLM confidence to restore a stash
    /// (`JUDGE_LOCAL_BASE_REPO_RECOVERY_CONFIDENCE`).
    pub local_recovery_confidence: f64,
    /// Character cap for persisted base-repo diffs
    /// (`JUDGE_LOCAL_BASE_REPO_RECOVERY_DIFF_LIMIT`).
    pub local_recovery_diff_limit: usize,
    /// Review policy TOML path (`POLICY_PATH`).
    pub policy_path: Option<PathBuf>,
    /// SQLite store location (`DATABASE_PATH`).
    pub database_path: PathBuf,
    /// Forge auth token (`GITHUB_TOKEN`).
    pub github_token: Option<String>,
    /// Forge repository as `owner/name` (`GITHUB_REPO`).
    pub github_repo: Option<String>,
    /// LLM API key (`ANTHROPIC_API_KEY`).
    pub anthropic_api_key: Option<String>,
    /// Default base repo path for worktree candidates missing metadata
    /// (`JUDGE_LOCAL_BASE_REPO_PATH`).
    pub local_base_repo_path: Option<PathBuf>,
    /// Default base branch for worktree candidates missing metadata
    /// (`JUDGE_LOCAL_BASE_BRANCH`).
    pub local_base_branch: String,
}

impl JudgeConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if no database path can be resolved.
    pub fn from_env() -> Result<Self> {
        Self::from_resolver(|key| std::env::var(key).ok())
    }

    /// Load configuration through a custom env resolver (for tests).
    ///
    /// # Errors
    ///
    /// Returns an error if no database path can be resolved.
    pub fn from_resolver(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_path = match env("DATABASE_PATH") {
            Some(p) => PathBuf::from(p),
            None => default_database_path()?,
        };

        let mut config = Self {
            agent_id: env("AGENT_ID").unwrap_or_else(default_agent_id),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            use_llm: true,
            dry_run: false,
            mode: JudgeMode::Auto,
            model: env("JUDGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            auto_fix_on_fail: true,
            auto_fix_max_attempts: DEFAULT_AUTO_FIX_MAX_ATTEMPTS,
            doom_loop_retries: DEFAULT_DOOM_LOOP_RETRIES,
            non_approve_retries: DEFAULT_NON_APPROVE_RETRIES,
            awaiting_retry_cooldown: Duration::from_millis(DEFAULT_AWAITING_RETRY_COOLDOWN_MS),
            queue_claim_ttl: Duration::from_millis(DEFAULT_QUEUE_CLAIM_TTL_MS),
            queue_max_attempts: DEFAULT_QUEUE_MAX_ATTEMPTS,
            queue_retry_delay: Duration::from_millis(DEFAULT_QUEUE_RETRY_DELAY_MS),
            local_recovery: RecoveryMode::Llm,
            local_recovery_confidence: DEFAULT_RECOVERY_CONFIDENCE,
            local_recovery_diff_limit: DEFAULT_RECOVERY_DIFF_LIMIT,
            policy_path: env("POLICY_PATH").map(PathBuf::from),
            database_path,
            github_token: env("GITHUB_TOKEN"),
            github_repo: env("GITHUB_REPO"),
            anthropic_api_key: env("ANTHROPIC_API_KEY"),
            local_base_repo_path: env("JUDGE_LOCAL_BASE_REPO_PATH").map(PathBuf::from),
            local_base_branch: env("JUDGE_LOCAL_BASE_BRANCH")
                .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_owned()),
        };
        config.apply_overrides(env);
        Ok(config)
    }

    /// Apply tunable env overrides over the defaults.
    ///
    /// Invalid values are logged and ignored rather than failing startup.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(ms) = parse_env_u64(&env, "POLL_INTERVAL_MS") {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(v) = env("USE_LLM") {
            self.use_llm = parse_bool(&v);
        }
        if let Some(v) = env("DRY_RUN") {
            self.dry_run = parse_bool(&v);
        }
        if let Some(v) = env("JUDGE_MODE") {
            match JudgeMode::parse(&v) {
                Some(mode) => self.mode = mode,
                None => {
                    tracing::warn!(var = "JUDGE_MODE", value = %v, "ignoring invalid env override");
                }
            }
        }
        if let Some(v) = env("JUDGE_AUTO_FIX_ON_FAIL") {
            self.auto_fix_on_fail = parse_bool(&v);
        }
        if let Some(n) = parse_env_i64(&env, "JUDGE_AUTO_FIX_MAX_ATTEMPTS") {
            self.auto_fix_max_attempts = n;
        }
        if let Some(n) = parse_env_i64(&env, "JUDGE_DOOM_LOOP_CIRCUIT_BREAKER_RETRIES") {
            self.doom_loop_retries = n;
        }
        if let Some(n) = parse_env_i64(&env, "JUDGE_NON_APPROVE_CIRCUIT_BREAKER_RETRIES") {
            self.non_approve_retries = n;
        }
        if let Some(ms) = parse_env_u64(&env, "JUDGE_AWAITING_RETRY_COOLDOWN_MS") {
            self.awaiting_retry_cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env_u64(&env, "JUDGE_MERGE_QUEUE_CLAIM_TTL_MS") {
            self.queue_claim_ttl = Duration::from_millis(ms);
        }
        if let Some(n) = parse_env_i64(&env, "JUDGE_MERGE_QUEUE_MAX_ATTEMPTS") {
            self.queue_max_attempts = n;
        }
        if let Some(ms) = parse_env_u64(&env, "JUDGE_MERGE_QUEUE_RETRY_DELAY_MS") {
            self.queue_retry_delay = Duration::from_millis(ms);
        }
        if let Some(v) = env("JUDGE_LOCAL_BASE_REPO_RECOVERY") {
            match RecoveryMode::parse(&v) {
                Some(mode) => self.local_recovery = mode,
                None => tracing::warn!(
                    var = "JUDGE_LOCAL_BASE_REPO_RECOVERY",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("JUDGE_LOCAL_BASE_REPO_RECOVERY_CONFIDENCE") {
            match v.parse::<f64>() {
                Ok(c) if (0.0..=1.0).contains(&c) => self.local_recovery_confidence = c,
                _ => tracing::warn!(
                    var = "JUDGE_LOCAL_BASE_REPO_RECOVERY_CONFIDENCE",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(n) = parse_env_u64(&env, "JUDGE_LOCAL_BASE_REPO_RECOVERY_DIFF_LIMIT") {
            self.local_recovery_diff_limit = usize::try_from(n).unwrap_or(usize::MAX);
        }
    }

    /// Whether AutoFix attempts are unbounded.
    pub fn auto_fix_unlimited(&self) -> bool {
        self.auto_fix_max_attempts < 0
    }
}

/// Parse a boolean-ish env value. Anything but `0`, `false`, `no`, `off`
/// (case-insensitive) is true.
fn parse_bool(v: &str) -> bool {
    !matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Parse an unsigned integer env value, warning on garbage.
fn parse_env_u64(env: &impl Fn(&str) -> Option<String>, key: &'static str) -> Option<u64> {
    let v = env(key)?;
    match v.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var = key, value = %v, "ignoring invalid env override");
            None
        }
    }
}

/// Parse a signed integer env value, warning on garbage.
fn parse_env_i64(env: &impl Fn(&str) -> Option<String>, key: &'static str) -> Option<i64> {
    let v = env(key)?;
    match v.trim().parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var = key, value = %v, "ignoring invalid env override");
            None
        }
    }
}

/// Generate a unique default agent id for this process.
fn default_agent_id() -> String {
    format!("judge-{}", uuid::Uuid::new_v4().simple())
}

/// Resolve the default store location under the platform data directory.
fn default_database_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "armitage", "armitage")
        .context("could not resolve a platform data directory; set DATABASE_PATH")?;
    Ok(dirs.data_dir().join("judge.db"))
}
