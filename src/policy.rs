//! Repository review policy: TOML-loaded rules evaluated against diff
//! statistics.
//!
//! The policy file (`POLICY_PATH`) is optional; every section has compiled-in
//! defaults so the daemon runs unconfigured. Evaluation is pure — diff stats
//! in, [`PolicyOutcome`] out — so the rules are unit-testable without a
//! forge or a worktree.

use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;

use crate::types::{ChangedFile, PolicyOutcome, PolicyViolation, RiskLevel, ViolationSeverity};

/// Auto-merge rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoMergePolicy {
    /// Whether approved candidates are merged by the judge.
    pub enabled: bool,
    /// Merge method (`merge`, `squash`, `rebase`).
    pub method: String,
}

impl Default for AutoMergePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            method: "squash".to_owned(),
        }
    }
}

/// LLM-review rules.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmPolicy {
    /// When true and auto-merge is enabled, an LLM-only failure downgrades
    /// to an informational note on an approve verdict.
    pub informational_bypass: bool,
}

/// Diff-size rules and risk thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsPolicy {
    /// Hard cap on changed files; beyond it the candidate fails policy.
    pub max_changed_files: usize,
    /// Hard cap on changed lines; beyond it the candidate fails policy.
    pub max_changed_lines: u64,
    /// Churn at or above this is at least medium risk.
    pub medium_risk_lines: u64,
    /// Churn at or above this is high risk.
    pub high_risk_lines: u64,
}

impl Default for LimitsPolicy {
    fn default() -> Self {
        Self {
            max_changed_files: 60,
            max_changed_lines: 2000,
            medium_risk_lines: 200,
            high_risk_lines: 800,
        }
    }
}

/// Documentation-coverage rules used by the docser trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocsPolicy {
    /// Path prefixes that count as documentation.
    pub allowed_prefixes: Vec<String>,
}

impl Default for DocsPolicy {
    fn default() -> Self {
        Self {
            allowed_prefixes: vec![
                "docs/".to_owned(),
                "ops/runbooks/".to_owned(),
                "README.md".to_owned(),
            ],
        }
    }
}

/// Stash-restore rules for dirty-base recovery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// Refuse restoration when the LLM reports error-severity issues.
    pub block_on_error_issues: bool,
    /// Refuse restoration when the LLM reports warning-severity issues.
    pub block_on_warning_issues: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            block_on_error_issues: true,
            block_on_warning_issues: false,
        }
    }
}

/// Full review policy.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReviewPolicy {
    /// Auto-merge rules.
    pub auto_merge: AutoMergePolicy,
    /// LLM-review rules.
    pub llm: LlmPolicy,
    /// Diff-size rules.
    pub limits: LimitsPolicy,
    /// Documentation rules.
    pub docs: DocsPolicy,
    /// Dirty-base recovery rules.
    pub recovery: RecoveryPolicy,
}

impl ReviewPolicy {
    /// Load the policy from `path`, or defaults when `path` is `None` or
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::info!("no POLICY_PATH set, using default review policy");
            return Ok(Self::default());
        };
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading review policy");
                toml::from_str(&contents)
                    .with_context(|| format!("failed to parse policy TOML {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "policy file missing, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read policy file {}: {e}",
                path.display()
            )),
        }
    }
}

/// Compile allowed-path globs, skipping unparseable ones with a warning.
fn compile_globs(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "skipping invalid path glob");
            }
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "glob set failed to build, allowing nothing");
        GlobSet::empty()
    })
}

/// Evaluate the policy against a candidate's diff statistics.
///
/// `allowed_paths` and `denied_commands` come from the task; an empty
/// allowed-path list means the task is unconstrained. `verify_commands` are
/// checked against the denied patterns because remediation tasks inherit
/// them verbatim.
pub fn evaluate_policy(
    policy: &ReviewPolicy,
    files: &[ChangedFile],
    allowed_paths: &[String],
    denied_commands: &[String],
    verify_commands: &[String],
) -> PolicyOutcome {
    let mut violations: Vec<PolicyViolation> = Vec::new();

    // Path scope.
    if !allowed_paths.is_empty() {
        let globs = compile_globs(allowed_paths);
        for file in files {
            if !globs.is_match(&file.path) {
                violations.push(PolicyViolation {
                    kind: "path_not_allowed".to_owned(),
                    severity: ViolationSeverity::Error,
                    message: format!("{} is outside the task's allowed paths", file.path),
                });
            }
        }
    }

    // Diff size.
    let total_lines: u64 = files.iter().map(ChangedFile::churn).sum();
    if files.len() > policy.limits.max_changed_files {
        violations.push(PolicyViolation {
            kind: "too_many_files".to_owned(),
            severity: ViolationSeverity::Error,
            message: format!(
                "{} files changed, limit is {}",
                files.len(),
                policy.limits.max_changed_files
            ),
        });
    }
    if total_lines > policy.limits.max_changed_lines {
        violations.push(PolicyViolation {
            kind: "diff_too_large".to_owned(),
            severity: ViolationSeverity::Error,
            message: format!(
                "{total_lines} lines changed, limit is {}",
                policy.limits.max_changed_lines
            ),
        });
    } else if total_lines >= policy.limits.medium_risk_lines {
        violations.push(PolicyViolation {
            kind: "large_diff".to_owned(),
            severity: ViolationSeverity::Warning,
            message: format!("{total_lines} lines changed"),
        });
    }

    // Denied commands.
    for pattern in denied_commands {
        let Ok(re) = regex::Regex::new(pattern) else {
            tracing::warn!(pattern = %pattern, "skipping invalid denied-command pattern");
            continue;
        };
        for command in verify_commands {
            if re.is_match(command) {
                violations.push(PolicyViolation {
                    kind: "denied_command".to_owned(),
                    severity: ViolationSeverity::Error,
                    message: format!("verification command matches denied pattern: {command}"),
                });
            }
        }
    }

    let pass = !violations
        .iter()
        .any(|v| v.severity == ViolationSeverity::Error);
    let reasons: Vec<String> = violations
        .iter()
        .filter(|v| v.severity == ViolationSeverity::Error)
        .map(|v| v.message.clone())
        .collect();
    let suggestions = if pass {
        Vec::new()
    } else {
        vec!["split the change or adjust the task's allowed paths".to_owned()]
    };

    PolicyOutcome {
        pass,
        reasons,
        suggestions,
        violations,
    }
}

/// Risk implied by diff size alone.
pub fn diff_risk(policy: &ReviewPolicy, files: &[ChangedFile]) -> RiskLevel {
    let total_lines: u64 = files.iter().map(ChangedFile::churn).sum();
    if total_lines >= policy.limits.high_risk_lines {
        RiskLevel::High
    } else if total_lines >= policy.limits.medium_risk_lines {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
