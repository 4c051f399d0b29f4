use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not inside a git repository (searched from {0})")]
    NotFound(String),
    #[error("git command failed: {0}")]
    GitCommand(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RepoError>;

// ---------------------------------------------------------------------------
// GitRunner trait (for testability)
// ---------------------------------------------------------------------------

/// Abstraction over git CLI operations so they can be mocked in tests.
pub trait GitRunner: Send + Sync {
    /// Run a git command in the given directory and return its outcome.
    fn run_git(&self, dir: &Path, args: &[&str]) -> std::result::Result<GitOutput, String>;
}

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn err(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Real git runner that shells out to the `git` binary.
pub struct RealGitRunner;

impl GitRunner for RealGitRunner {
    fn run_git(&self, dir: &Path, args: &[&str]) -> std::result::Result<GitOutput, String> {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| e.to_string())?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Repository discovery
// ---------------------------------------------------------------------------

/// Walk up from `start` until a directory containing `.git` is found.
pub fn find_repo_root(start: &Path) -> Result<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(RepoError::NotFound(start.display().to_string()));
        }
    }
}

// ---------------------------------------------------------------------------
// Merge driver wiring
// ---------------------------------------------------------------------------

const ATTRIBUTES_LINE: &str = ".tick/issues/*.json merge=tick";

/// Wire the custom merge driver into `.gitattributes` and `.git/config` so
/// Git hands concurrent tick edits to `<cli> merge-file`. Idempotent.
pub fn wire_merge_driver(repo_root: &Path, git: &dyn GitRunner, cli: &str) -> Result<()> {
    let attributes = repo_root.join(".gitattributes");
    let existing = fs::read_to_string(&attributes).unwrap_or_default();
    if !existing.lines().any(|l| l.trim() == ATTRIBUTES_LINE) {
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(ATTRIBUTES_LINE);
        updated.push('\n');
        fs::write(&attributes, updated)?;
    }

    let driver = format!("{cli} merge-file %O %A %B %P");
    for (key, value) in [
        ("merge.tick.name", "tick three-way JSON merge"),
        ("merge.tick.driver", driver.as_str()),
    ] {
        let out = git
            .run_git(repo_root, &["config", key, value])
            .map_err(RepoError::GitCommand)?;
        if !out.success {
            return Err(RepoError::GitCommand(out.stderr));
        }
    }
    info!(repo = %repo_root.display(), "merge driver wired");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
