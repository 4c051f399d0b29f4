use std::path::Path;

use thiserror::Error;

use crate::repo::GitRunner;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no origin remote configured")]
    NoOrigin,
    #[error("could not parse owner/repo from origin url `{0}`")]
    UnparseableOrigin(String),
    #[error("git command failed: {0}")]
    GitCommand(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

// ---------------------------------------------------------------------------
// Origin URL parsing
// ---------------------------------------------------------------------------

/// Parse `owner/repo` out of a Git origin URL. Handles the SSH form
/// (`git@host:owner/repo.git`), the HTTPS form
/// (`https://host/owner/repo.git`), and the ssh:// scheme.
pub fn parse_origin_url(url: &str) -> Option<(String, String)> {
    let url = url.trim();

    // scp-like SSH: git@github.com:owner/repo.git
    let path = if let Some((_, rest)) = url.split_once('@').filter(|(head, _)| !head.contains("://")) {
        rest.split_once(':').map(|(_, p)| p)?
    } else {
        // scheme://host/owner/repo(.git)
        let rest = url.split_once("://").map(|(_, r)| r)?;
        rest.split_once('/').map(|(_, p)| p)?
    };

    let path = path.trim_matches('/').trim_end_matches(".git");
    let mut parts = path.rsplitn(2, '/');
    let repo = parts.next()?;
    let owner = parts.next()?;
    // A nested path like gitlab groups keeps only the final two segments.
    let owner = owner.rsplit('/').next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

// ---------------------------------------------------------------------------
// Project detection
// ---------------------------------------------------------------------------

/// Detect the `owner/repo` project name from the repository's origin
/// remote. `TICK_OWNER` overrides the detected owner.
pub fn detect_project(repo_root: &Path, git: &dyn GitRunner) -> Result<String> {
    let out = git
        .run_git(repo_root, &["config", "--get", "remote.origin.url"])
        .map_err(IdentityError::GitCommand)?;
    if !out.success || out.stdout.trim().is_empty() {
        return Err(IdentityError::NoOrigin);
    }
    let url = out.stdout.trim().to_string();
    let (owner, repo) =
        parse_origin_url(&url).ok_or_else(|| IdentityError::UnparseableOrigin(url.clone()))?;

    let owner = std::env::var("TICK_OWNER")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or(owner);
    Ok(format!("{owner}/{repo}"))
}

/// The identity used to stamp `owner`/`created_by` on new ticks:
/// `TICK_OWNER`, else `user.name` from git config, else "unknown".
pub fn whoami(repo_root: &Path, git: &dyn GitRunner) -> String {
    if let Ok(owner) = std::env::var("TICK_OWNER") {
        if !owner.is_empty() {
            return owner;
        }
    }
    git.run_git(repo_root, &["config", "--get", "user.name"])
        .ok()
        .filter(|o| o.success && !o.stdout.trim().is_empty())
        .map(|o| o.stdout.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
