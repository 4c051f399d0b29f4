use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::types::{Tick, ValidationError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tick not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("list task panicked")]
    ListTask,
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Derived summary written to `.tick/.index.json` for fast external
/// consumption. Gitignored; rebuilt from the issue files at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub generated_at: chrono::DateTime<Utc>,
    pub ticks: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub status: crate::types::Status,
    pub priority: u8,
    pub updated_at: chrono::DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TickStore
// ---------------------------------------------------------------------------

/// Exclusive owner of the on-disk `.tick/` layout. Every write goes through
/// temp-file-plus-rename so readers never observe a partial file; callers
/// serialize concurrent writes within a process, and Git is the merge
/// substrate across processes and clones.
#[derive(Debug, Clone)]
pub struct TickStore {
    root: PathBuf,
}

impl TickStore {
    /// Create a store rooted at the repository root (the directory that
    /// contains `.tick/`). Does not touch the filesystem; see [`ensure`].
    ///
    /// [`ensure`]: TickStore::ensure
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.root
    }

    pub fn tick_dir(&self) -> PathBuf {
        self.root.join(".tick")
    }

    pub fn issues_dir(&self) -> PathBuf {
        self.tick_dir().join("issues")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.tick_dir().join("logs")
    }

    pub fn records_dir(&self) -> PathBuf {
        self.logs_dir().join("records")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.logs_dir().join("runs")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.logs_dir().join("checkpoints")
    }

    pub fn context_dir(&self) -> PathBuf {
        self.logs_dir().join("context")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.tick_dir().join("worktrees")
    }

    pub fn activity_path(&self) -> PathBuf {
        self.tick_dir().join("activity").join("activity.jsonl")
    }

    pub fn index_path(&self) -> PathBuf {
        self.tick_dir().join(".index.json")
    }

    pub fn issue_path(&self, id: &str) -> PathBuf {
        self.issues_dir().join(format!("{id}.json"))
    }

    /// Idempotently create the `.tick/` tree and its `.gitignore`.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.issues_dir())?;
        fs::create_dir_all(self.records_dir())?;
        fs::create_dir_all(self.runs_dir())?;
        fs::create_dir_all(self.checkpoints_dir())?;
        fs::create_dir_all(self.context_dir())?;
        fs::create_dir_all(self.activity_path().parent().expect("activity parent"))?;

        let gitignore = self.tick_dir().join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, ".index.json\nworktrees/\n")?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.issues_dir().is_dir()
    }

    /// Read one tick, validating after parse.
    pub fn read(&self, id: &str) -> Result<Tick> {
        let path = self.issue_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let tick: Tick = serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tick.validate()?;
        Ok(tick)
    }

    /// Validate, then write the tick atomically.
    pub fn write(&self, tick: &Tick) -> Result<()> {
        self.write_as(tick, "local")
    }

    /// Same as [`write`], tagging the author in the activity log.
    ///
    /// [`write`]: TickStore::write
    pub fn write_as(&self, tick: &Tick, author: &str) -> Result<()> {
        tick.validate()?;
        let path = self.issue_path(&tick.id);
        atomic_write_json(&path, tick)?;
        debug!(tick_id = %tick.id, author, "tick written");
        self.log_activity("write", &tick.id, author);
        Ok(())
    }

    /// Remove a tick file. Absent files are not an error.
    pub fn delete(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.issue_path(id)) {
            Ok(()) => {
                self.log_activity("delete", id, "local");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every tick, parallelizing file reads bounded by logical CPUs.
    /// The first parse or validation error aborts the listing.
    pub async fn list(&self) -> Result<Vec<Tick>> {
        let mut paths = Vec::new();
        let dir = self.issues_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
            {
                paths.push(path);
            }
        }

        let permits = Arc::new(Semaphore::new(num_cpus::get().max(1)));
        let mut set: JoinSet<Result<Tick>> = JoinSet::new();
        for path in paths {
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.expect("semaphore closed");
                let text = tokio::fs::read_to_string(&path).await?;
                let tick: Tick =
                    serde_json::from_str(&text).map_err(|source| StoreError::Parse {
                        path: path.display().to_string(),
                        source,
                    })?;
                tick.validate()?;
                Ok(tick)
            });
        }

        let mut ticks = Vec::new();
        while let Some(joined) = set.join_next().await {
            let tick = joined.map_err(|_| StoreError::ListTask)??;
            ticks.push(tick);
        }
        ticks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ticks)
    }

    /// Derive `.tick/.index.json` from the current tick set.
    pub async fn save_index(&self) -> Result<()> {
        let ticks = self.list().await?;
        let index = Index {
            generated_at: Utc::now(),
            ticks: ticks
                .iter()
                .map(|t| IndexEntry {
                    id: t.id.clone(),
                    title: t.title.clone(),
                    status: t.status,
                    priority: t.priority,
                    updated_at: t.updated_at,
                })
                .collect(),
        };
        atomic_write_json(&self.index_path(), &index)?;
        Ok(())
    }

    /// Best-effort append to the activity log; never fails the caller.
    fn log_activity(&self, op: &str, id: &str, author: &str) {
        let line = serde_json::json!({
            "ts": Utc::now(),
            "op": op,
            "id": id,
            "author": author,
        });
        let path = self.activity_path();
        let result = path
            .parent()
            .map(fs::create_dir_all)
            .transpose()
            .and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .and_then(|mut f| writeln!(f, "{line}"))
            });
        if let Err(e) = result {
            warn!(error = %e, "activity log append failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Atomic write
// ---------------------------------------------------------------------------

/// Serialize pretty-printed JSON (trailing newline) to a hidden temp file in
/// the destination directory, fsync, then rename over the target.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    body.push(b'\n');

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tick.json");
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let mut f = File::create(&tmp)?;
    f.write_all(&body)?;
    f.sync_all()?;
    drop(f);
    fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Status, TickType};

    fn store() -> (tempfile::TempDir, TickStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TickStore::new(dir.path());
        store.ensure().unwrap();
        (dir, store)
    }

    fn make_tick(id: &str) -> Tick {
        Tick::new(id, format!("tick {id}"), TickType::Task, "alice")
    }

    #[test]
    fn ensure_is_idempotent() {
        let (_dir, store) = store();
        store.ensure().unwrap();
        store.ensure().unwrap();
        assert!(store.issues_dir().is_dir());
        let gitignore = fs::read_to_string(store.tick_dir().join(".gitignore")).unwrap();
        assert!(gitignore.contains(".index.json"));
    }

    #[test]
    fn write_read_round_trip() {
        let (_dir, store) = store();
        let mut t = make_tick("a1b");
        t.add_label("backend");
        t.append_note("hello", None);
        store.write(&t).unwrap();

        let back = store.read("a1b").unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn read_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.read("zzz"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn write_rejects_invalid() {
        let (_dir, store) = store();
        let mut t = make_tick("a1b");
        t.status = Status::Closed; // no closed_at
        assert!(store.write(&t).is_err());
        assert!(!store.issue_path("a1b").exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.write(&make_tick("a1b")).unwrap();
        store.delete("a1b").unwrap();
        store.delete("a1b").unwrap();
        assert!(!store.issue_path("a1b").exists());
    }

    #[test]
    fn written_file_is_pretty_with_trailing_newline() {
        let (_dir, store) = store();
        store.write(&make_tick("a1b")).unwrap();
        let text = fs::read_to_string(store.issue_path("a1b")).unwrap();
        assert!(text.starts_with("{\n"));
        assert!(text.ends_with("}\n"));
        // Deterministic key order: id is the first field.
        assert!(text.trim_start_matches("{\n").trim_start().starts_with("\"id\""));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let (_dir, store) = store();
        store.write(&make_tick("a1b")).unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.issues_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn list_returns_all_sorted() {
        let (_dir, store) = store();
        for id in ["c3d", "a1b", "b2c"] {
            store.write(&make_tick(id)).unwrap();
        }
        let ticks = store.list().await.unwrap();
        let ids: Vec<_> = ticks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a1b", "b2c", "c3d"]);
    }

    #[tokio::test]
    async fn list_skips_hidden_files() {
        let (_dir, store) = store();
        store.write(&make_tick("a1b")).unwrap();
        fs::write(store.issues_dir().join(".stray.json.tmp"), "{").unwrap();
        let ticks = store.list().await.unwrap();
        assert_eq!(ticks.len(), 1);
    }

    #[tokio::test]
    async fn list_propagates_parse_error() {
        let (_dir, store) = store();
        store.write(&make_tick("a1b")).unwrap();
        fs::write(store.issues_dir().join("bad.json"), "{ not json").unwrap();
        assert!(matches!(
            store.list().await,
            Err(StoreError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn save_index_derives_summary() {
        let (_dir, store) = store();
        store.write(&make_tick("a1b")).unwrap();
        store.write(&make_tick("b2c")).unwrap();
        store.save_index().await.unwrap();

        let text = fs::read_to_string(store.index_path()).unwrap();
        let index: Index = serde_json::from_str(&text).unwrap();
        assert_eq!(index.ticks.len(), 2);
        assert_eq!(index.ticks[0].id, "a1b");
    }

    #[test]
    fn activity_log_records_writes() {
        let (_dir, store) = store();
        store.write_as(&make_tick("a1b"), "dependency-analyzer").unwrap();
        let log = fs::read_to_string(store.activity_path()).unwrap();
        assert!(log.contains("dependency-analyzer"));
        assert!(log.contains("a1b"));
    }
}
