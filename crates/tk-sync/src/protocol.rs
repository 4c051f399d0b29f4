use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tk_core::types::Tick;

// ---------------------------------------------------------------------------
// SyncMessage — the wire frames
// ---------------------------------------------------------------------------

/// JSON frames exchanged with the remote, tagged by `type`. Tick payloads
/// are flattened into the frame per the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    // -- client → remote --
    /// Full local state advertised right after connect.
    SyncFull { ticks: HashMap<String, Tick> },
    TickUpdate {
        #[serde(flatten)]
        tick: Box<Tick>,
    },
    TickDelete { id: String },
    TickOperationResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tick: Option<Box<Tick>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Live agent output streaming. Ephemeral: never queued offline.
    RunEvent {
        #[serde(flatten)]
        event: serde_json::Value,
    },

    // -- remote → client --
    StateFull { ticks: HashMap<String, Tick> },
    TickCreated {
        #[serde(flatten)]
        tick: Box<Tick>,
    },
    TickUpdated {
        #[serde(flatten)]
        tick: Box<Tick>,
    },
    TickDeleted { id: String },
    TickOperation {
        #[serde(rename = "requestId")]
        request_id: String,
        operation: TickOperation,
        #[serde(rename = "tickId")]
        tick_id: String,
        #[serde(default)]
        payload: OperationPayload,
    },
    Error { message: String },
}

impl SyncMessage {
    /// Messages worth keeping when the connection is down. Ephemeral
    /// streaming frames are dropped instead.
    pub fn is_queueable(&self) -> bool {
        matches!(self, SyncMessage::TickUpdate { .. } | SyncMessage::TickDelete { .. })
    }
}

// ---------------------------------------------------------------------------
// TickOperation
// ---------------------------------------------------------------------------

/// Remote-initiated operations that map onto the approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOperation {
    AddNote,
    Approve,
    Reject,
    Close,
    Reopen,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
