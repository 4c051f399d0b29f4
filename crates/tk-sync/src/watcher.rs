use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use notify::{
    event::{CreateKind, ModifyKind, RemoveKind},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tracing::debug;

use crate::pending::PendingWrites;

// ---------------------------------------------------------------------------
// IssueChange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueChange {
    pub path: PathBuf,
    pub tick_id: String,
    pub kind: IssueChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueChangeKind {
    /// Created or modified: the file now holds the current tick.
    Upserted,
    Deleted,
}

/// Maps a `notify::EventKind` to a change kind, `None` for events we do
/// not care about (access, metadata-only renames handled as modify).
fn map_event_kind(kind: &EventKind) -> Option<IssueChangeKind> {
    match kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => Some(IssueChangeKind::Upserted),
        EventKind::Create(_) => Some(IssueChangeKind::Upserted),
        EventKind::Modify(ModifyKind::Name(_)) => Some(IssueChangeKind::Upserted),
        EventKind::Modify(_) => Some(IssueChangeKind::Upserted),
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => Some(IssueChangeKind::Deleted),
        EventKind::Remove(_) => Some(IssueChangeKind::Deleted),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// IssueWatcher
// ---------------------------------------------------------------------------

/// Watches `.tick/issues/` and surfaces tick-file changes, suppressing
/// echoes of the sync client's own remote-driven writes via the shared
/// [`PendingWrites`] table.
pub struct IssueWatcher {
    // Held for its Drop; dropping stops the native watcher.
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<notify::Event>>,
    pending: Arc<PendingWrites>,
}

impl IssueWatcher {
    pub fn new(issues_dir: &Path, pending: Arc<PendingWrites>) -> Result<Self, notify::Error> {
        let (tx, rx): (
            Sender<notify::Result<notify::Event>>,
            Receiver<notify::Result<notify::Event>>,
        ) = crossbeam_channel::unbounded();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(issues_dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            rx,
            pending,
        })
    }

    /// Drain all pending filesystem events into tick changes. Temp files,
    /// hidden files, and echo-suppressed paths are filtered; consecutive
    /// duplicate changes collapse to one.
    pub fn recv_changes(&self) -> Vec<IssueChange> {
        let mut changes: Vec<IssueChange> = Vec::new();

        while let Ok(result) = self.rx.try_recv() {
            let Ok(event) = result else { continue };
            let Some(kind) = map_event_kind(&event.kind) else {
                continue;
            };

            for path in &event.paths {
                let Some(tick_id) = tick_id_of(path) else {
                    continue;
                };
                if self.pending.consume(path) {
                    debug!(path = %path.display(), "echo-suppressed watcher event");
                    continue;
                }
                let change = IssueChange {
                    path: path.clone(),
                    tick_id,
                    kind,
                };
                if changes.last() != Some(&change) {
                    changes.push(change);
                }
            }
        }
        changes
    }
}

/// The tick id for an issue file path, `None` for anything that is not a
/// visible `<id>.json`.
pub fn tick_id_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') || !name.ends_with(".json") || name.ends_with(".tmp") {
        return None;
    }
    let id = name.strip_suffix(".json")?;
    if tk_core::types::is_valid_id(id) {
        Some(id.to_string())
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Duration;

    fn wait() {
        thread::sleep(Duration::from_millis(500));
    }

    #[test]
    fn tick_id_extraction() {
        assert_eq!(
            tick_id_of(Path::new("/r/.tick/issues/a1b.json")),
            Some("a1b".to_string())
        );
        assert_eq!(tick_id_of(Path::new("/r/.tick/issues/.a1b.json.tmp")), None);
        assert_eq!(tick_id_of(Path::new("/r/.tick/issues/.index.json")), None);
        assert_eq!(tick_id_of(Path::new("/r/.tick/issues/notes.txt")), None);
        assert_eq!(tick_id_of(Path::new("/r/.tick/issues/toolong9.json")), None);
    }

    #[test]
    fn detects_issue_write() {
        let dir = tempfile::tempdir().unwrap();
        let pending = Arc::new(PendingWrites::new());
        let watcher = IssueWatcher::new(dir.path(), Arc::clone(&pending)).unwrap();

        fs::write(dir.path().join("a1b.json"), "{}").unwrap();
        wait();

        let changes = watcher.recv_changes();
        assert!(
            changes
                .iter()
                .any(|c| c.tick_id == "a1b" && c.kind == IssueChangeKind::Upserted),
            "expected an upsert for a1b, got {changes:?}"
        );
    }

    #[test]
    fn detects_issue_delete() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a1b.json");
        fs::write(&file, "{}").unwrap();

        let pending = Arc::new(PendingWrites::new());
        let watcher = IssueWatcher::new(dir.path(), Arc::clone(&pending)).unwrap();
        wait();
        let _ = watcher.recv_changes(); // drain any setup noise

        fs::remove_file(&file).unwrap();
        wait();

        let changes = watcher.recv_changes();
        assert!(
            changes
                .iter()
                .any(|c| c.tick_id == "a1b" && c.kind == IssueChangeKind::Deleted),
            "expected a delete for a1b, got {changes:?}"
        );
    }

    #[test]
    fn pending_write_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let pending = Arc::new(PendingWrites::new());
        let watcher = IssueWatcher::new(dir.path(), Arc::clone(&pending)).unwrap();

        let file = dir.path().join("a1b.json");
        pending.mark(&file);
        fs::write(&file, "{}").unwrap();
        wait();

        let changes = watcher.recv_changes();
        assert!(
            !changes.iter().any(|c| c.tick_id == "a1b"),
            "echo should be suppressed, got {changes:?}"
        );
    }

    #[test]
    fn temp_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let pending = Arc::new(PendingWrites::new());
        let watcher = IssueWatcher::new(dir.path(), Arc::clone(&pending)).unwrap();

        fs::write(dir.path().join(".a1b.json.tmp"), "{}").unwrap();
        wait();

        assert!(watcher.recv_changes().is_empty());
    }
}
