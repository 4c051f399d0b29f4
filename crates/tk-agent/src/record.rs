use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use tk_core::store::atomic_write_json;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("run record not found: {0}")]
    NotFound(String),
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

pub type Result<T> = std::result::Result<T, RecordError>;

// ---------------------------------------------------------------------------
// RunRecord
// ---------------------------------------------------------------------------

/// A structured tool call captured from agent output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

/// Terminal log of one agent invocation for one tick. While the run is in
/// flight the record lives at `<tick>.live.json`; finalization renames it
/// over `<tick>.json` atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub tick_id: String,
    pub session_id: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
    pub metrics: RunMetrics,
    pub success: bool,
    pub turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
}

impl RunRecord {
    pub fn begin(tick_id: impl Into<String>) -> Self {
        Self {
            tick_id: tick_id.into(),
            session_id: String::new(),
            model: String::new(),
            started_at: Utc::now(),
            ended_at: None,
            output: String::new(),
            thinking: String::new(),
            tool_invocations: Vec::new(),
            metrics: RunMetrics::default(),
            success: false,
            turns: 0,
            verification: None,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Persists run records under `.tick/logs/records/` plus an optional
/// per-run event log under `.tick/logs/runs/<tick>.jsonl`.
#[derive(Debug, Clone)]
pub struct RecordStore {
    records_dir: PathBuf,
    runs_dir: PathBuf,
}

impl RecordStore {
    pub fn new(records_dir: impl Into<PathBuf>, runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: records_dir.into(),
            runs_dir: runs_dir.into(),
        }
    }

    /// Build from the tick store's layout.
    pub fn for_store(store: &tk_core::store::TickStore) -> Self {
        Self::new(store.records_dir(), store.runs_dir())
    }

    pub fn record_path(&self, tick_id: &str) -> PathBuf {
        self.records_dir.join(format!("{tick_id}.json"))
    }

    pub fn live_path(&self, tick_id: &str) -> PathBuf {
        self.records_dir.join(format!("{tick_id}.live.json"))
    }

    /// Write the in-progress snapshot atomically.
    pub fn write_live(&self, record: &RunRecord) -> Result<()> {
        atomic_write_json(&self.live_path(&record.tick_id), record)?;
        Ok(())
    }

    /// Stamp the end time and rename the live snapshot over the final
    /// record. Writes the final content first so a crash between the two
    /// steps can only leave a stale live file, never a truncated record.
    pub fn finalize(&self, record: &mut RunRecord) -> Result<()> {
        record.ended_at = Some(Utc::now());
        record.metrics.duration_ms = (record.ended_at.expect("just set") - record.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.write_live(record)?;
        fs::rename(self.live_path(&record.tick_id), self.record_path(&record.tick_id))?;
        debug!(tick_id = %record.tick_id, "run record finalized");
        Ok(())
    }

    pub fn read(&self, tick_id: &str) -> Result<RunRecord> {
        let path = self.record_path(tick_id);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecordError::NotFound(tick_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|source| RecordError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// All finalized records; in-progress `.live.json` snapshots are
    /// skipped.
    pub fn list(&self) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        if !self.records_dir.is_dir() {
            return Ok(records);
        }
        for entry in fs::read_dir(&self.records_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".json") || name.ends_with(".live.json") || name.starts_with('.') {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let record: RunRecord =
                serde_json::from_str(&text).map_err(|source| RecordError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    /// Append a structured event to the per-tick run log. Best-effort
    /// streaming telemetry; errors surface but callers may ignore them.
    pub fn append_run_event(&self, tick_id: &str, event: &serde_json::Value) -> Result<()> {
        fs::create_dir_all(&self.runs_dir)?;
        let path = self.runs_dir.join(format!("{tick_id}.jsonl"));
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{event}")?;
        Ok(())
    }

    /// Remove finalized records older than `keep`, returning pruned paths.
    pub fn prune(&self, keep: chrono::Duration) -> Result<Vec<PathBuf>> {
        let cutoff = Utc::now() - keep;
        let mut pruned = Vec::new();
        for record in self.list()? {
            if record.ended_at.is_some_and(|t| t < cutoff) {
                let path = self.record_path(&record.tick_id);
                remove_if_exists(&path)?;
                remove_if_exists(&self.runs_dir.join(format!("{}.jsonl", record.tick_id)))?;
                pruned.push(path);
            }
        }
        Ok(pruned)
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
