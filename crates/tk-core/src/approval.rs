use thiserror::Error;
use tracing::info;

use crate::store::{StoreError, TickStore};
use crate::types::{Awaiting, Tick, TickType, Verdict};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ApprovalError>;

// ---------------------------------------------------------------------------
// CloseOutcome
// ---------------------------------------------------------------------------

/// What happened to a close attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The tick is closed.
    Closed,
    /// A `requires` gate routed the tick into an awaiting state instead of
    /// closing it; the caller should tell the user to `approve`/`reject`.
    Routed(Awaiting),
    /// The tick is an epic with open children; pass `force` to close them
    /// along with it.
    ChildrenOpen(Vec<String>),
}

// ---------------------------------------------------------------------------
// Close routing
// ---------------------------------------------------------------------------

/// Attempt to close a tick, honoring its `requires` gate and, for epics,
/// its open children. `force` bypasses both: children are bulk-closed with
/// a marker reason and the gate is skipped.
pub async fn route_close(
    store: &TickStore,
    id: &str,
    reason: Option<&str>,
    force: bool,
) -> Result<CloseOutcome> {
    let mut tick = store.read(id)?;

    if tick.is_closed() {
        return Ok(CloseOutcome::Closed);
    }

    if tick.tick_type == TickType::Epic {
        let open_children: Vec<Tick> = store
            .list()
            .await?
            .into_iter()
            .filter(|t| t.parent.as_deref() == Some(id) && !t.is_closed())
            .collect();
        if !open_children.is_empty() {
            if !force {
                return Ok(CloseOutcome::ChildrenOpen(
                    open_children.into_iter().map(|t| t.id).collect(),
                ));
            }
            for mut child in open_children {
                child.close(format!("closed with parent {id}"));
                store.write(&child)?;
            }
        }
    }

    if let Some(gate) = tick.requires {
        if !force {
            let awaiting = gate.awaiting();
            tick.set_awaiting(awaiting);
            tick.verdict = None;
            store.write(&tick)?;
            info!(tick_id = %id, awaiting = awaiting.as_str(), "close routed to review");
            return Ok(CloseOutcome::Routed(awaiting));
        }
    }

    tick.close(reason.unwrap_or_default());
    store.write(&tick)?;
    info!(tick_id = %id, "tick closed");
    Ok(CloseOutcome::Closed)
}

// ---------------------------------------------------------------------------
// Verdict processing
// ---------------------------------------------------------------------------

/// Apply the verdict table to a tick carrying both an awaiting state and a
/// verdict. Returns `true` when the tick ended up closed. Both fields are
/// always cleared by a transition; a tick with no awaiting state or no
/// verdict is left untouched.
pub fn process_verdict(store: &TickStore, id: &str) -> Result<bool> {
    let mut tick = store.read(id)?;

    let Some(verdict) = tick.verdict else {
        return Ok(false);
    };
    let Some(awaiting) = tick.effective_awaiting() else {
        return Ok(false);
    };

    let close = match (awaiting, verdict) {
        (
            Awaiting::Work | Awaiting::Approval | Awaiting::Review | Awaiting::Content,
            Verdict::Approved,
        ) => true,
        (
            Awaiting::Work | Awaiting::Approval | Awaiting::Review | Awaiting::Content,
            Verdict::Rejected,
        ) => false,
        (Awaiting::Input | Awaiting::Escalation, Verdict::Approved) => false,
        (Awaiting::Input | Awaiting::Escalation, Verdict::Rejected) => true,
        (Awaiting::Checkpoint, _) => false,
    };

    if close {
        let reason = match verdict {
            Verdict::Approved => "approved",
            Verdict::Rejected => "rejected",
        };
        tick.close(reason);
    } else {
        tick.clear_awaiting();
        tick.verdict = None;
        tick.touch();
    }
    store.write(&tick)?;
    info!(
        tick_id = %id,
        awaiting = awaiting.as_str(),
        ?verdict,
        closed = close,
        "verdict processed"
    );
    Ok(close)
}

/// Record an approved verdict and immediately run the transition.
pub fn approve(store: &TickStore, id: &str) -> Result<bool> {
    let mut tick = store.read(id)?;
    tick.verdict = Some(Verdict::Approved);
    tick.touch();
    store.write(&tick)?;
    process_verdict(store, id)
}

/// Record a rejected verdict and run the transition. Feedback, when given,
/// is written as a human-marked note in a separate store write that lands
/// before the verdict, so an agent worker that picks the tick up again
/// always sees the feedback on disk.
pub fn reject(store: &TickStore, id: &str, feedback: Option<&str>) -> Result<bool> {
    if let Some(text) = feedback {
        let mut tick = store.read(id)?;
        tick.append_note(text, Some("[human]"));
        store.write(&tick)?;
    }
    let mut tick = store.read(id)?;
    tick.verdict = Some(Verdict::Rejected);
    tick.touch();
    store.write(&tick)?;
    process_verdict(store, id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
