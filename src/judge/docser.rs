//! Docser trigger: spawn a documentation follow-up task after a merge.
//!
//! On every successful merge the judge inspects the changed file list and
//! the repository's documentation surface. A follow-up is skipped only when
//! the merge touched nothing but documentation *and* no structural gap
//! (missing `docs/`, empty `docs/`, missing READMEs) exists. Duplicate
//! follow-ups are suppressed by scanning for a prior `docser.task_created`
//! event on the source task.

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use crate::policy::ReviewPolicy;
use crate::store::{NewTask, Store, TaskRow};
use crate::types::{EventKind, RiskLevel};

/// Timebox for documentation tasks, in minutes.
const DOCSER_TIMEBOX_MINUTES: i64 = 45;

/// Package managers the verification-command sniff can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    /// pnpm (pnpm-lock.yaml).
    Pnpm,
    /// yarn (yarn.lock).
    Yarn,
    /// bun (bun.lockb / bun.lock).
    Bun,
    /// npm (package-lock.json).
    Npm,
}

impl PackageManager {
    /// Binary name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Bun => "bun",
            Self::Npm => "npm",
        }
    }
}

/// Sniff the repository's package manager from its lockfile.
pub fn detect_package_manager(root: &Path) -> Option<PackageManager> {
    if root.join("pnpm-lock.yaml").exists() {
        Some(PackageManager::Pnpm)
    } else if root.join("yarn.lock").exists() {
        Some(PackageManager::Yarn)
    } else if root.join("bun.lockb").exists() || root.join("bun.lock").exists() {
        Some(PackageManager::Bun)
    } else if root.join("package-lock.json").exists() {
        Some(PackageManager::Npm)
    } else {
        None
    }
}

/// Resolve the verification command for a docser task.
///
/// A `Makefile` with a `check` target wins; otherwise the lockfile sniff
/// decides, and a repository with neither gets no verification command.
pub fn detect_verify_command(root: &Path) -> Option<String> {
    if let Ok(makefile) = std::fs::read_to_string(root.join("Makefile")) {
        if makefile
            .lines()
            .any(|line| line.starts_with("check:") || line.starts_with("check :"))
        {
            return Some("make check".to_owned());
        }
    }
    detect_package_manager(root).map(|pm| format!("{} run check", pm.as_str()))
}

/// Structural documentation gaps in the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocGaps {
    /// `docs/` directory does not exist.
    pub missing_docs_dir: bool,
    /// `docs/` exists but has no files.
    pub empty_docs_dir: bool,
    /// Root `README.md` is missing.
    pub missing_root_readme: bool,
    /// `docs/README.md` is missing.
    pub missing_docs_readme: bool,
}

impl DocGaps {
    /// Whether any gap exists.
    pub fn any(&self) -> bool {
        self.missing_docs_dir
            || self.empty_docs_dir
            || self.missing_root_readme
            || self.missing_docs_readme
    }
}

/// Inspect the repository's documentation surface.
pub fn inspect_doc_gaps(root: &Path) -> DocGaps {
    let docs_dir = root.join("docs");
    let missing_docs_dir = !docs_dir.is_dir();
    let empty_docs_dir = !missing_docs_dir
        && std::fs::read_dir(&docs_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true);
    DocGaps {
        missing_docs_dir,
        empty_docs_dir,
        missing_root_readme: !root.join("README.md").is_file(),
        missing_docs_readme: !docs_dir.join("README.md").is_file(),
    }
}

/// Whether every changed path is under a documentation prefix.
pub fn all_changes_are_docs(policy: &ReviewPolicy, changed_files: &[String]) -> bool {
    changed_files.iter().all(|path| {
        policy
            .docs
            .allowed_prefixes
            .iter()
            .any(|prefix| path == prefix || path.starts_with(prefix))
    })
}

/// Create a documentation follow-up for a merged change, unless the merge
/// was documentation-only with no gaps, or a follow-up already exists.
///
/// `repo_root` is the local checkout when the judge has one (local mode);
/// without it the gap inspection is skipped and only the changed-file rule
/// applies. Returns the new task id when one was created.
///
/// # Errors
///
/// Returns an error if a store operation fails.
pub async fn maybe_create_docser_task(
    store: &Store,
    policy: &ReviewPolicy,
    agent_id: &str,
    repo_root: Option<&Path>,
    source_task: &TaskRow,
    changed_files: &[String],
) -> Result<Option<String>> {
    if store
        .has_event(EventKind::DocserTaskCreated, "task", &source_task.id)
        .await?
    {
        tracing::debug!(task_id = %source_task.id, "docser follow-up already created");
        return Ok(None);
    }

    let gaps = repo_root.map(inspect_doc_gaps).unwrap_or_default();
    if all_changes_are_docs(policy, changed_files) && !gaps.any() {
        tracing::debug!(task_id = %source_task.id, "documentation-only merge, no docser task");
        return Ok(None);
    }

    let verify_commands = repo_root
        .and_then(detect_verify_command)
        .into_iter()
        .collect::<Vec<_>>();

    let task_id = store
        .create_task(&NewTask {
            title: format!("Documentation update: {}", source_task.title),
            goal: format!(
                "Update documentation for the merged change \"{}\". Cover the docs/ \
                 tree and READMEs; fill structural gaps first.",
                source_task.title
            ),
            role: "docser".to_owned(),
            risk_level: RiskLevel::Low,
            priority: source_task.priority,
            allowed_paths: vec![
                "docs/**".to_owned(),
                "ops/runbooks/**".to_owned(),
                "README.md".to_owned(),
            ],
            denied_commands: source_task.denied_commands.clone(),
            verify_commands,
            depends_on: vec![source_task.id.clone()],
            timebox_minutes: Some(DOCSER_TIMEBOX_MINUTES),
            kind: "code".to_owned(),
            context: json!({
                "source_task_id": source_task.id,
                "changed_files": changed_files,
                "doc_gaps": {
                    "missing_docs_dir": gaps.missing_docs_dir,
                    "empty_docs_dir": gaps.empty_docs_dir,
                    "missing_root_readme": gaps.missing_root_readme,
                    "missing_docs_readme": gaps.missing_docs_readme,
                },
            }),
        })
        .await?;

    store
        .record_event(
            EventKind::DocserTaskCreated,
            "task",
            &source_task.id,
            agent_id,
            json!({ "docser_task_id": task_id }),
        )
        .await?;

    tracing::info!(task_id = %task_id, source = %source_task.id, "docser task created");
    Ok(Some(task_id))
}
