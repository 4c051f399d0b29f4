//! Real-time sync client: bidirectional synchronization of the local
//! `.tick/issues/` tree with a remote service over one WebSocket, with an
//! offline queue, echo suppression, and auto-reconnect.

pub mod client;
pub mod pending;
pub mod protocol;
pub mod queue;
pub mod watcher;

pub use client::{SyncClient, SyncError, SyncState};
pub use pending::PendingWrites;
pub use protocol::{OperationPayload, SyncMessage, TickOperation};
pub use queue::OfflineQueue;
pub use watcher::IssueWatcher;
