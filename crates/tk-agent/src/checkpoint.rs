use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use tk_core::store::atomic_write_json;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint already exists: {0}")]
    AlreadyExists(Uuid),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] tk_core::store::StoreError),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// A recoverable snapshot of engine progress, written every
/// `checkpoint_interval` iterations. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub epic_id: String,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub completed_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
}

impl Checkpoint {
    pub fn new(epic_id: impl Into<String>, iteration: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            epic_id: epic_id.into(),
            iteration,
            timestamp: Utc::now(),
            total_tokens: 0,
            total_cost: 0.0,
            completed_tasks: Vec::new(),
            git_commit: None,
            worktree_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_store(store: &tk_core::store::TickStore) -> Self {
        Self::new(store.checkpoints_dir())
    }

    fn path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Persist a checkpoint. Checkpoints are immutable: writing an id that
    /// already exists is an error.
    pub fn write(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path(checkpoint.id);
        if path.exists() {
            return Err(CheckpointError::AlreadyExists(checkpoint.id));
        }
        atomic_write_json(&path, checkpoint)?;
        Ok(())
    }

    pub fn read(&self, id: Uuid) -> Result<Checkpoint> {
        let path = self.path(id);
        let text = fs::read_to_string(&path)?;
        parse(&path, &text)
    }

    /// All checkpoints for an epic, oldest first.
    pub fn list_for_epic(&self, epic_id: &str) -> Result<Vec<Checkpoint>> {
        let mut out = Vec::new();
        if !self.dir.is_dir() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let cp = parse(&path, &text)?;
            if cp.epic_id == epic_id {
                out.push(cp);
            }
        }
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(out)
    }

    /// The most recent checkpoint for an epic, if any.
    pub fn latest_for_epic(&self, epic_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.list_for_epic(epic_id)?.pop())
    }
}

fn parse(path: &Path, text: &str) -> Result<Checkpoint> {
    serde_json::from_str(text).map_err(|source| CheckpointError::Parse {
        path: path.display().to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
