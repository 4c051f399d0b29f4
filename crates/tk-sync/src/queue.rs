use std::collections::VecDeque;
use std::sync::Mutex;

use crate::protocol::SyncMessage;

// ---------------------------------------------------------------------------
// OfflineQueue
// ---------------------------------------------------------------------------

/// In-memory FIFO of outbound messages produced while the connection is
/// down. Guarded by its own mutex; never held across a network write.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    inner: Mutex<VecDeque<SyncMessage>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, msg: SyncMessage) {
        self.inner.lock().expect("queue lock poisoned").push_back(msg);
    }

    /// Take everything, oldest first. The caller sends them and calls
    /// [`requeue_front`] with whatever failed.
    ///
    /// [`requeue_front`]: OfflineQueue::requeue_front
    pub fn drain(&self) -> Vec<SyncMessage> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .drain(..)
            .collect()
    }

    /// Put unsent messages back at the head, preserving their order ahead
    /// of anything queued meanwhile.
    pub fn requeue_front(&self, unsent: Vec<SyncMessage>) {
        let mut q = self.inner.lock().expect("queue lock poisoned");
        for msg in unsent.into_iter().rev() {
            q.push_front(msg);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
