pub mod gc;
pub mod init;
pub mod list;
pub mod merge_file;
pub mod review;
pub mod run;
pub mod sync;
pub mod tick;

use std::fmt;

use tk_core::approval::ApprovalError;
use tk_core::project::IdentityError;
use tk_core::repo::{find_repo_root, RepoError};
use tk_core::store::{StoreError, TickStore};
use tk_core::types::{Awaiting, Requires, Status, Tick, TickType};
use tk_graph::AwaitingFilter;

// ---------------------------------------------------------------------------
// Error classification → exit codes
// ---------------------------------------------------------------------------

/// Bad arguments or bad invocation; maps to exit 2.
#[derive(Debug)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UsageError {}

/// `.tick/` has not been initialized here; maps to exit 3.
#[derive(Debug)]
pub struct NotInitialized;

impl fmt::Display for NotInitialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no .tick directory here; run `ticks init` first")
    }
}

impl std::error::Error for NotInitialized {}

/// Stable exit codes: 2 usage, 3 not in a repo, 4 not found, 5 identity
/// detection, 6 everything else.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UsageError>().is_some() {
        return 2;
    }
    if err.downcast_ref::<NotInitialized>().is_some() {
        return 3;
    }
    if let Some(repo) = err.downcast_ref::<RepoError>() {
        return match repo {
            RepoError::NotFound(_) => 3,
            _ => 6,
        };
    }
    if let Some(store) = err.downcast_ref::<StoreError>() {
        return match store {
            StoreError::NotFound(_) => 4,
            _ => 6,
        };
    }
    if let Some(ApprovalError::Store(StoreError::NotFound(_))) =
        err.downcast_ref::<ApprovalError>()
    {
        return 4;
    }
    if err.downcast_ref::<IdentityError>().is_some() {
        return 5;
    }
    6
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Locate the enclosing repository and open its tick store.
pub fn open_store() -> anyhow::Result<TickStore> {
    let cwd = std::env::current_dir()?;
    let root = find_repo_root(&cwd)?;
    let store = TickStore::new(root);
    if !store.exists() {
        return Err(NotInitialized.into());
    }
    Ok(store)
}

/// Like [`open_store`] but tolerates a missing `.tick/` (for `init`).
pub fn repo_root() -> anyhow::Result<std::path::PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(find_repo_root(&cwd)?)
}

// ---------------------------------------------------------------------------
// Argument parsing helpers
// ---------------------------------------------------------------------------

pub fn parse_status(s: &str) -> anyhow::Result<Status> {
    s.parse()
        .map_err(|_| UsageError(format!("invalid status `{s}` (open, in_progress, closed)")).into())
}

pub fn parse_type(s: &str) -> anyhow::Result<TickType> {
    s.parse().map_err(|_| {
        UsageError(format!(
            "invalid type `{s}` (bug, feature, task, epic, chore)"
        ))
        .into()
    })
}

pub fn parse_requires(s: &str) -> anyhow::Result<Requires> {
    s.parse()
        .map_err(|_| UsageError(format!("invalid gate `{s}` (approval, review, content)")).into())
}

/// Awaiting filter syntax: "" means not-awaiting, "any" means any,
/// otherwise a comma-separated list of kinds.
pub fn parse_awaiting_filter(s: &str) -> anyhow::Result<AwaitingFilter> {
    match s {
        "" => Ok(AwaitingFilter::NotAwaiting),
        "any" => Ok(AwaitingFilter::Any),
        list => {
            let kinds: Result<Vec<Awaiting>, _> =
                list.split(',').map(|part| part.trim().parse()).collect();
            match kinds {
                Ok(kinds) => Ok(AwaitingFilter::OneOf(kinds)),
                Err(_) => Err(UsageError(format!("invalid awaiting filter `{s}`")).into()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

pub fn print_tick_line(t: &Tick) {
    let gate = match t.effective_awaiting() {
        Some(a) => format!(" [awaiting {}]", a.as_str()),
        None => String::new(),
    };
    let blockers = if t.blocked_by.is_empty() {
        String::new()
    } else {
        format!(" <- {}", t.blocked_by.join(","))
    };
    println!(
        "{}  p{}  {:<11}  {:<7}  {}{}{}",
        t.id,
        t.priority,
        t.status.as_str(),
        t.tick_type.as_str(),
        t.title,
        gate,
        blockers
    );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
