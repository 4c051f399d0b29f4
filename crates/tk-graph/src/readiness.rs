use std::collections::HashMap;

use chrono::Utc;
use tk_core::types::{Status, Tick};

/// Returns `true` when `blocker_id` currently blocks: it resolves to a tick
/// in the universe whose status is not closed. Unresolved ids are treated
/// as closed (non-blocking) — blockers may legitimately reference deleted
/// ticks.
fn is_blocking(blocker_id: &str, universe: &HashMap<&str, &Tick>) -> bool {
    universe
        .get(blocker_id)
        .is_some_and(|t| t.status != Status::Closed)
}

fn universe_map(universe: &[Tick]) -> HashMap<&str, &Tick> {
    universe.iter().map(|t| (t.id.as_str(), t)).collect()
}

fn has_open_blocker(tick: &Tick, universe: &HashMap<&str, &Tick>) -> bool {
    tick.blocked_by.iter().any(|b| is_blocking(b, universe))
}

/// The subset of `filtered` that an agent (or human) can start right now:
/// non-closed, not deferred, not awaiting a human, and not blocked by any
/// open tick in `universe`.
pub fn ready(filtered: &[Tick], universe: &[Tick]) -> Vec<Tick> {
    let map = universe_map(universe);
    let now = Utc::now();
    filtered
        .iter()
        .filter(|t| {
            t.status != Status::Closed
                && !t.is_deferred(now)
                && !t.is_awaiting()
                && !has_open_blocker(t, &map)
        })
        .cloned()
        .collect()
}

/// Same as [`ready`] but keeps ticks that are awaiting a human or flagged
/// manual; used by displays that show the full actionable set.
pub fn ready_include_awaiting(filtered: &[Tick], universe: &[Tick]) -> Vec<Tick> {
    let map = universe_map(universe);
    let now = Utc::now();
    filtered
        .iter()
        .filter(|t| {
            t.status != Status::Closed && !t.is_deferred(now) && !has_open_blocker(t, &map)
        })
        .cloned()
        .collect()
}

/// Non-closed ticks with at least one currently-blocking blocker.
pub fn blocked(filtered: &[Tick], universe: &[Tick]) -> Vec<Tick> {
    let map = universe_map(universe);
    filtered
        .iter()
        .filter(|t| t.status != Status::Closed && has_open_blocker(t, &map))
        .cloned()
        .collect()
}

/// Total order used everywhere a "next task" is picked: in-progress ticks
/// first, then ascending priority, then ascending created_at, then id.
pub fn sort_by_priority_created_at(ticks: &mut [Tick]) {
    ticks.sort_by(|a, b| {
        let a_active = a.status != Status::InProgress;
        let b_active = b.status != Status::InProgress;
        a_active
            .cmp(&b_active)
            .then(a.priority.cmp(&b.priority))
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
