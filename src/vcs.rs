//! Local VCS adapter: git subprocess operations against one repository.
//!
//! Every operation returns a [`GitOutput`] carrying the subprocess exit
//! success plus captured stdout/stderr, so the local merge driver can
//! short-circuit on failure and surface git's own words as the reason.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    /// Whether git exited zero.
    pub success: bool,
    /// Captured stdout, trimmed.
    pub stdout: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
}

impl GitOutput {
    /// A synthetic failure for when the subprocess could not be spawned.
    fn spawn_failure(error: &std::io::Error) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: format!("failed to run git: {error}"),
        }
    }

    /// The most informative message for error reporting: stderr when
    /// present, stdout otherwise.
    pub fn message(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Merge options for [`Vcs::merge_branch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Only fast-forward; fail instead of creating a merge commit.
    pub ff_only: bool,
    /// Do not open an editor for the merge commit message.
    pub no_edit: bool,
}

/// Capabilities the judge needs from a local repository.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Paths with uncommitted modifications (`status --porcelain`, staged or
    /// not). One path per stdout line.
    async fn changed_files(&self) -> GitOutput;

    /// Full uncommitted diff against HEAD.
    async fn working_tree_diff(&self) -> GitOutput;

    /// Untracked, non-ignored files. One path per stdout line.
    async fn untracked_files(&self) -> GitOutput;

    /// Stash all local changes under a message.
    async fn stash_changes(&self, message: &str) -> GitOutput;

    /// Commit id of the most recent stash.
    async fn latest_stash_ref(&self) -> GitOutput;

    /// Apply a stash by ref, leaving it in the stash list.
    async fn apply_stash(&self, stash_ref: &str) -> GitOutput;

    /// Drop a stash by ref.
    async fn drop_stash(&self, stash_ref: &str) -> GitOutput;

    /// Stage everything.
    async fn stage_all(&self) -> GitOutput;

    /// Commit staged changes.
    async fn commit_changes(&self, message: &str) -> GitOutput;

    /// Whether a merge is in progress (`success` is the answer).
    async fn is_merge_in_progress(&self) -> GitOutput;

    /// Abort an in-progress merge.
    async fn abort_merge(&self) -> GitOutput;

    /// Check out a branch.
    async fn checkout_branch(&self, name: &str) -> GitOutput;

    /// Hard-reset the current branch to a ref.
    async fn reset_hard(&self, target: &str) -> GitOutput;

    /// Delete untracked files and directories.
    async fn clean_untracked(&self) -> GitOutput;

    /// Merge a branch into the current one.
    async fn merge_branch(&self, name: &str, options: MergeOptions) -> GitOutput;

    /// `--numstat` summary of a branch against a base
    /// (`base...branch`). One `added\tdeleted\tpath` triple per line.
    async fn diff_numstat(&self, base: &str, branch: &str) -> GitOutput;

    /// Full diff of a branch against a base (`base...branch`).
    async fn diff_range(&self, base: &str, branch: &str) -> GitOutput;
}

/// Git CLI adapter rooted at one repository path.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Create an adapter for the repository at `path`.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
        }
    }

    /// The repository path this adapter operates on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn git(&self, args: &[&str]) -> GitOutput {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .output()
            .await;
        match output {
            Ok(output) => GitOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            },
            Err(e) => GitOutput::spawn_failure(&e),
        }
    }
}

#[async_trait]
impl Vcs for GitRepo {
    async fn changed_files(&self) -> GitOutput {
        let mut output = self.git(&["status", "--porcelain"]).await;
        if output.success {
            // Strip the two-column status prefix, keep paths only.
            output.stdout = output
                .stdout
                .lines()
                .filter_map(|line| line.get(3..))
                .collect::<Vec<_>>()
                .join("\n");
        }
        output
    }

    async fn working_tree_diff(&self) -> GitOutput {
        self.git(&["diff", "HEAD"]).await
    }

    async fn untracked_files(&self) -> GitOutput {
        self.git(&["ls-files", "--others", "--exclude-standard"]).await
    }

    async fn stash_changes(&self, message: &str) -> GitOutput {
        self.git(&["stash", "push", "--include-untracked", "-m", message])
            .await
    }

    async fn latest_stash_ref(&self) -> GitOutput {
        self.git(&["rev-parse", "-q", "--verify", "stash@{0}"]).await
    }

    async fn apply_stash(&self, stash_ref: &str) -> GitOutput {
        self.git(&["stash", "apply", stash_ref]).await
    }

    async fn drop_stash(&self, stash_ref: &str) -> GitOutput {
        self.git(&["stash", "drop", stash_ref]).await
    }

    async fn stage_all(&self) -> GitOutput {
        self.git(&["add", "-A"]).await
    }

    async fn commit_changes(&self, message: &str) -> GitOutput {
        self.git(&["commit", "-m", message]).await
    }

    async fn is_merge_in_progress(&self) -> GitOutput {
        self.git(&["rev-parse", "-q", "--verify", "MERGE_HEAD"]).await
    }

    async fn abort_merge(&self) -> GitOutput {
        self.git(&["merge", "--abort"]).await
    }

    async fn checkout_branch(&self, name: &str) -> GitOutput {
        self.git(&["checkout", name]).await
    }

    async fn reset_hard(&self, target: &str) -> GitOutput {
        self.git(&["reset", "--hard", target]).await
    }

    async fn clean_untracked(&self) -> GitOutput {
        self.git(&["clean", "-fd"]).await
    }

    async fn merge_branch(&self, name: &str, options: MergeOptions) -> GitOutput {
        let mut args = vec!["merge"];
        if options.ff_only {
            args.push("--ff-only");
        }
        if options.no_edit {
            args.push("--no-edit");
        }
        args.push(name);
        self.git(&args).await
    }

    async fn diff_numstat(&self, base: &str, branch: &str) -> GitOutput {
        let range = format!("{base}...{branch}");
        self.git(&["diff", "--numstat", &range]).await
    }

    async fn diff_range(&self, base: &str, branch: &str) -> GitOutput {
        let range = format!("{base}...{branch}");
        self.git(&["diff", &range]).await
    }
}

/// Parse `git diff --numstat` output into changed-file statistics.
///
/// Binary files report `-` for both counts; they are kept with zero counts
/// so path rules still see them.
pub fn parse_numstat(stdout: &str) -> Vec<crate::types::ChangedFile> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let additions = parts.next()?.trim();
            let deletions = parts.next()?.trim();
            let path = parts.next()?.trim();
            if path.is_empty() {
                return None;
            }
            Some(crate::types::ChangedFile {
                path: path.to_owned(),
                additions: additions.parse().unwrap_or(0),
                deletions: deletions.parse().unwrap_or(0),
            })
        })
        .collect()
}
