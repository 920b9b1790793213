//! Git access for version computation and cache fingerprinting.
//!
//! Shells out to `git` for all operations. This ensures we inherit the user's
//! configuration (safe directories, alternates, worktrees) exactly as the
//! user's own `git` sees it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cache::RepositoryHeadState;

/// Separates commit messages in `git log` output.
const RECORD_SEPARATOR: char = '\u{1e}';

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to execute the `git` command.
    #[error("failed to run git: {0}")]
    Exec(#[from] std::io::Error),

    /// `git` returned a non-zero exit code.
    #[error("git {command} failed: {stderr}")]
    Command {
        /// The git subcommand that failed (e.g., "status").
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// Not inside a git repository.
    #[error("not a git repository (or any parent up to mount point)")]
    NotARepo,

    /// No `git` executable on `PATH`.
    #[error("git executable not found on PATH")]
    GitNotFound,
}

/// Result alias for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// What the version pipeline needs from a repository.
pub trait Repository: Send + Sync + fmt::Debug {
    /// The repository's git directory (`.git` for a normal checkout).
    fn git_dir(&self) -> &Utf8Path;

    /// Branch, HEAD commit, latest version tag and dirtiness.
    fn head_state(&self, tag_prefix: &str) -> GitResult<RepositoryHeadState>;

    /// The highest `<prefix><semver>` tag reachable from HEAD.
    fn latest_version_tag(&self, tag_prefix: &str) -> GitResult<Option<String>>;

    /// Full messages of the commits after `since` (or all commits), newest
    /// first.
    fn commit_messages_since(&self, since: Option<&str>) -> GitResult<Vec<String>>;
}

/// Shared handle to a repository.
pub type RepositoryHandle = Arc<dyn Repository>;

/// A repository accessed through the `git` executable.
#[derive(Debug, Clone)]
pub struct GitRepository {
    git: PathBuf,
    work_dir: Utf8PathBuf,
    git_dir: Utf8PathBuf,
}

impl GitRepository {
    /// Find the repository containing `dir`.
    #[instrument]
    pub fn discover(dir: &Utf8Path) -> GitResult<Self> {
        let git = which::which("git").map_err(|_| GitError::GitNotFound)?;
        let git_dir = run(&git, dir.as_std_path(), &["rev-parse", "--absolute-git-dir"])?;
        let git_dir = Utf8PathBuf::from(git_dir.trim());
        let work_dir = match run(&git, dir.as_std_path(), &["rev-parse", "--show-toplevel"]) {
            Ok(top) => Utf8PathBuf::from(top.trim()),
            Err(GitError::Command { .. }) => dir.to_path_buf(),
            Err(e) => return Err(e),
        };
        debug!(%git_dir, %work_dir, "discovered repository");
        Ok(Self {
            git,
            work_dir,
            git_dir,
        })
    }

    /// Top level of the working tree.
    pub fn work_dir(&self) -> &Utf8Path {
        &self.work_dir
    }

    /// The checked out branch, `None` when HEAD is detached.
    #[instrument(skip(self))]
    pub fn current_branch(&self) -> GitResult<Option<String>> {
        match self.git(&["symbolic-ref", "--short", "-q", "HEAD"]) {
            Ok(branch) => {
                let branch = branch.trim().to_string();
                debug!(%branch, "current branch");
                Ok(Some(branch))
            }
            Err(GitError::Command { .. }) => {
                debug!("detached HEAD");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The commit HEAD points at, `None` before the first commit.
    pub fn head_commit(&self) -> GitResult<Option<String>> {
        match self.git(&["rev-parse", "--verify", "-q", "HEAD"]) {
            Ok(commit) => Ok(Some(commit.trim().to_string())),
            Err(GitError::Command { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check whether the working tree is clean (no uncommitted changes).
    pub fn is_clean(&self) -> GitResult<bool> {
        let output = self.git(&["status", "--porcelain"])?;
        Ok(output.trim().is_empty())
    }

    fn git(&self, args: &[&str]) -> GitResult<String> {
        run(&self.git, self.work_dir.as_std_path(), args)
    }
}

impl Repository for GitRepository {
    fn git_dir(&self) -> &Utf8Path {
        &self.git_dir
    }

    #[instrument(skip(self))]
    fn head_state(&self, tag_prefix: &str) -> GitResult<RepositoryHeadState> {
        let state = RepositoryHeadState {
            head_ref: self.current_branch()?,
            head_commit: self.head_commit()?,
            latest_tag: self.latest_version_tag(tag_prefix)?,
            dirty: !self.is_clean()?,
        };
        debug!(?state, "head state");
        Ok(state)
    }

    #[instrument(skip(self))]
    fn latest_version_tag(&self, tag_prefix: &str) -> GitResult<Option<String>> {
        if self.head_commit()?.is_none() {
            return Ok(None);
        }
        let pattern = format!("{tag_prefix}*");
        let output = self.git(&[
            "tag",
            "--list",
            &pattern,
            "--merged",
            "HEAD",
            "--sort=-version:refname",
        ])?;

        let tag = output
            .lines()
            .map(str::trim)
            .find(|tag| {
                tag.strip_prefix(tag_prefix)
                    .is_some_and(|version| semver::Version::parse(version).is_ok())
            })
            .map(str::to_string);
        debug!(?tag, "latest version tag");
        Ok(tag)
    }

    #[instrument(skip(self))]
    fn commit_messages_since(&self, since: Option<&str>) -> GitResult<Vec<String>> {
        if self.head_commit()?.is_none() {
            return Ok(Vec::new());
        }
        let range = since.map_or_else(|| "HEAD".to_string(), |tag| format!("{tag}..HEAD"));
        let format = format!("--format=%B{RECORD_SEPARATOR}");
        let output = self.git(&["log", &range, &format])?;

        let messages: Vec<String> = output
            .split(RECORD_SEPARATOR)
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .collect();
        debug!(count = messages.len(), "commit messages");
        Ok(messages)
    }
}

/// Run a git command in `dir` and return its stdout.
fn run(git: &Path, dir: &Path, args: &[&str]) -> GitResult<String> {
    let output = Command::new(git).current_dir(dir).args(args).output()?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        // Detect "not a git repo" specifically
        if stderr.contains("not a git repository") {
            return Err(GitError::NotARepo);
        }

        Err(GitError::Command {
            command: args.first().unwrap_or(&"").to_string(),
            stderr,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory repository for pipeline tests.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct StaticRepository {
        pub git_dir: Utf8PathBuf,
        pub head: RepositoryHeadState,
        pub tag: Option<String>,
        pub messages: Vec<String>,
    }

    impl Repository for StaticRepository {
        fn git_dir(&self) -> &Utf8Path {
            &self.git_dir
        }

        fn head_state(&self, _tag_prefix: &str) -> GitResult<RepositoryHeadState> {
            Ok(RepositoryHeadState {
                latest_tag: self.tag.clone(),
                ..self.head.clone()
            })
        }

        fn latest_version_tag(&self, _tag_prefix: &str) -> GitResult<Option<String>> {
            Ok(self.tag.clone())
        }

        fn commit_messages_since(&self, _since: Option<&str>) -> GitResult<Vec<String>> {
            Ok(self.messages.clone())
        }
    }
}
