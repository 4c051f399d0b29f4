use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long after a remote-driven write the watcher ignores events for the
/// written path. Distinct from the engine's watch-mode restart debounce.
pub const ECHO_WINDOW: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// PendingWrites
// ---------------------------------------------------------------------------

/// Echo-suppression table: paths the client itself just wrote while
/// applying an inbound remote event. The file watcher consults this before
/// emitting an outbound update, which breaks the remote→local→remote loop.
/// Own mutex; acquired after the connection mutex, never before.
#[derive(Debug, Default)]
pub struct PendingWrites {
    inner: Mutex<HashMap<PathBuf, Instant>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` is about to be written by the sync client.
    pub fn mark(&self, path: impl Into<PathBuf>) {
        self.inner
            .lock()
            .expect("pending lock poisoned")
            .insert(path.into(), Instant::now());
    }

    /// Returns `true` when an event for `path` should be suppressed. The
    /// entry is consumed either way it is found: a young entry suppresses
    /// once, a stale entry is dropped and the event flows.
    pub fn consume(&self, path: &Path) -> bool {
        let mut map = self.inner.lock().expect("pending lock poisoned");
        match map.remove(path) {
            Some(written) => written.elapsed() < ECHO_WINDOW,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_mark_suppresses_once() {
        let pending = PendingWrites::new();
        let path = Path::new("/repo/.tick/issues/a1b.json");
        pending.mark(path);

        assert!(pending.consume(path));
        // Entry was consumed; a second event flows through.
        assert!(!pending.consume(path));
    }

    #[test]
    fn unknown_path_is_not_suppressed() {
        let pending = PendingWrites::new();
        assert!(!pending.consume(Path::new("/elsewhere.json")));
    }

    #[test]
    fn stale_entry_does_not_suppress() {
        let pending = PendingWrites::new();
        let path = Path::new("/repo/.tick/issues/a1b.json");
        {
            let mut map = pending.inner.lock().unwrap();
            map.insert(path.to_path_buf(), Instant::now() - ECHO_WINDOW * 2);
        }
        assert!(!pending.consume(path));
        assert!(pending.is_empty());
    }
}
