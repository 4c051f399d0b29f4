use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::types::{Status, Tick};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MergeConflict {
    /// Both sides closed the tick at the same instant with different
    /// reasons. Reconciliation is impossible; a human resolves.
    #[error("tick {id}: both sides closed with different reasons at the same timestamp")]
    ContradictoryClose { id: String },
}

// ---------------------------------------------------------------------------
// merge_ticks — the pure three-way merge
// ---------------------------------------------------------------------------

/// Merge two concurrent edits of the same tick against their common base.
///
/// Scalar fields resolve three-way: a side that changed a field from the
/// base wins over a side that did not; when both changed, the side with the
/// later `updated_at` wins, ties preferring ours. Set-valued fields merge
/// additions and deletions from both sides. Notes merge line-wise. The
/// terminal group (status, closed_at, closed_reason, verdict, awaiting)
/// moves as one unit so a merged tick can never be half-closed.
pub fn merge_ticks(base: &Tick, ours: &Tick, theirs: &Tick) -> Result<Tick, MergeConflict> {
    let ours_wins = ours.updated_at >= theirs.updated_at;

    if ours.status == Status::Closed
        && theirs.status == Status::Closed
        && ours.updated_at == theirs.updated_at
        && ours.closed_reason != theirs.closed_reason
    {
        return Err(MergeConflict::ContradictoryClose {
            id: ours.id.clone(),
        });
    }

    let mut merged = ours.clone();

    // Scalars outside the terminal group.
    merged.title = pick3(&base.title, &ours.title, &theirs.title, ours_wins);
    merged.description = pick3(
        &base.description,
        &ours.description,
        &theirs.description,
        ours_wins,
    );
    merged.acceptance_criteria = pick3(
        &base.acceptance_criteria,
        &ours.acceptance_criteria,
        &theirs.acceptance_criteria,
        ours_wins,
    );
    merged.priority = pick3(&base.priority, &ours.priority, &theirs.priority, ours_wins);
    merged.tick_type = pick3(
        &base.tick_type,
        &ours.tick_type,
        &theirs.tick_type,
        ours_wins,
    );
    merged.owner = pick3(&base.owner, &ours.owner, &theirs.owner, ours_wins);
    merged.parent = pick3(&base.parent, &ours.parent, &theirs.parent, ours_wins);
    merged.discovered_from = pick3(
        &base.discovered_from,
        &ours.discovered_from,
        &theirs.discovered_from,
        ours_wins,
    );
    merged.project = pick3(&base.project, &ours.project, &theirs.project, ours_wins);
    merged.requires = pick3(&base.requires, &ours.requires, &theirs.requires, ours_wins);
    merged.manual = pick3(&base.manual, &ours.manual, &theirs.manual, ours_wins);
    merged.defer_until = pick3(
        &base.defer_until,
        &ours.defer_until,
        &theirs.defer_until,
        ours_wins,
    );
    merged.external_ref = pick3(
        &base.external_ref,
        &ours.external_ref,
        &theirs.external_ref,
        ours_wins,
    );

    // Terminal group: moves as a unit from whichever side changed it, later
    // side winning when both did.
    let ours_terminal_changed = terminal_group(ours) != terminal_group(base);
    let theirs_terminal_changed = terminal_group(theirs) != terminal_group(base);
    let terminal_src = match (ours_terminal_changed, theirs_terminal_changed) {
        (true, false) => ours,
        (false, true) => theirs,
        _ => {
            if ours_wins {
                ours
            } else {
                theirs
            }
        }
    };
    merged.status = terminal_src.status;
    merged.closed_at = terminal_src.closed_at;
    merged.closed_reason = terminal_src.closed_reason.clone();
    merged.verdict = terminal_src.verdict;
    merged.awaiting = terminal_src.awaiting;

    // Sets.
    merged.labels = merge_ordered_set(&base.labels, &ours.labels, &theirs.labels);
    merged.blocked_by = merge_ordered_set(&base.blocked_by, &ours.blocked_by, &theirs.blocked_by);

    // Notes.
    merged.notes = merge_notes(&base.notes, &ours.notes, &theirs.notes, ours_wins);

    merged.created_at = base.created_at.min(ours.created_at).min(theirs.created_at);
    merged.updated_at = ours.updated_at.max(theirs.updated_at);
    Ok(merged)
}

/// Three-way pick for a scalar field: the side that diverged from the base
/// wins; when both diverged, the later writer wins (ties prefer ours).
fn pick3<T: Clone + PartialEq>(base: &T, ours: &T, theirs: &T, ours_wins: bool) -> T {
    let ours_changed = ours != base;
    let theirs_changed = theirs != base;
    match (ours_changed, theirs_changed) {
        (true, false) => ours.clone(),
        (false, true) => theirs.clone(),
        _ => {
            if ours_wins {
                ours.clone()
            } else {
                theirs.clone()
            }
        }
    }
}

fn terminal_group(t: &Tick) -> (Status, Option<chrono::DateTime<chrono::Utc>>, &str, Option<crate::types::Verdict>, Option<crate::types::Awaiting>) {
    (t.status, t.closed_at, t.closed_reason.as_str(), t.verdict, t.awaiting)
}

/// Three-way set merge preserving first-appearance order from ours:
/// result = base ∪ additions − deletions, with theirs' additions appended
/// in their original order.
fn merge_ordered_set(base: &[String], ours: &[String], theirs: &[String]) -> Vec<String> {
    let deleted_by = |side: &[String], item: &String| base.contains(item) && !side.contains(item);

    let mut result: Vec<String> = Vec::new();
    for item in ours {
        if !deleted_by(theirs, item) && !result.contains(item) {
            result.push(item.clone());
        }
    }
    for item in theirs {
        if !deleted_by(ours, item) && !result.contains(item) {
            result.push(item.clone());
        }
    }
    result
}

/// Line-level three-way merge of the append-only notes field.
///
/// When the base is a prefix of both sides (the append-only fast path),
/// identical lines appended by both sides are emitted once and divergent
/// appends are both kept, ordered by their embedded timestamp prefix. When
/// either side rewrote history, fall back to last-writer-wins.
fn merge_notes(base: &str, ours: &str, theirs: &str, ours_wins: bool) -> String {
    if ours == theirs {
        return ours.to_string();
    }

    let base_lines: Vec<&str> = base.lines().collect();
    let ours_lines: Vec<&str> = ours.lines().collect();
    let theirs_lines: Vec<&str> = theirs.lines().collect();

    let is_prefix = |longer: &[&str]| longer.len() >= base_lines.len() && longer[..base_lines.len()] == base_lines[..];
    if !is_prefix(&ours_lines) || !is_prefix(&theirs_lines) {
        return if ours_wins { ours.to_string() } else { theirs.to_string() };
    }

    let ours_added = &ours_lines[base_lines.len()..];
    let theirs_added = &theirs_lines[base_lines.len()..];

    let mut appended: Vec<&str> = Vec::new();
    for line in ours_added.iter().chain(theirs_added.iter()) {
        if !appended.contains(line) {
            appended.push(line);
        }
    }
    // Timestamp prefixes are RFC 3339 and sort lexicographically; the sort
    // is stable so untimestamped lines keep their relative order.
    appended.sort_by_key(|line| note_timestamp(line).map(str::to_string));

    let mut out = String::new();
    for line in base_lines.iter().chain(appended.iter()) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Extract the `[<timestamp>]` prefix of a note line, if present.
fn note_timestamp(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(&rest[..end])
}

// ---------------------------------------------------------------------------
// merge_file — the Git merge-driver entry point
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeFileOutcome {
    /// Clean merge; the result was written over the ours file.
    Merged,
    /// Automatic reconciliation failed; conflict markers were written so a
    /// human can resolve. The caller must exit non-zero.
    Conflicted(String),
}

impl MergeFileOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, MergeFileOutcome::Merged)
    }
}

/// Run the three-way merge over files, as invoked by Git:
/// `merge-file <base> <ours> <theirs> <path>`. The result is left in the
/// ours file per the merge-driver contract.
pub fn merge_file(
    base_path: &Path,
    ours_path: &Path,
    theirs_path: &Path,
    display_path: &str,
) -> std::io::Result<MergeFileOutcome> {
    let base_text = fs::read_to_string(base_path)?;
    let ours_text = fs::read_to_string(ours_path)?;
    let theirs_text = fs::read_to_string(theirs_path)?;

    let parsed = (
        parse_side(&base_text),
        parse_side(&ours_text),
        parse_side(&theirs_text),
    );

    let (base, ours, theirs) = match parsed {
        (Some(b), Some(o), Some(t)) => (b, o, t),
        _ => {
            warn!(path = display_path, "merge input failed to parse; writing conflict markers");
            write_conflict_markers(ours_path, &ours_text, &theirs_text)?;
            return Ok(MergeFileOutcome::Conflicted(
                "unparseable merge input".to_string(),
            ));
        }
    };

    match merge_ticks(&base, &ours, &theirs) {
        Ok(merged) => {
            let mut body = serde_json::to_vec_pretty(&merged)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            body.push(b'\n');
            fs::write(ours_path, body)?;
            Ok(MergeFileOutcome::Merged)
        }
        Err(conflict) => {
            warn!(path = display_path, error = %conflict, "irreconcilable tick merge");
            write_conflict_markers(ours_path, &ours_text, &theirs_text)?;
            Ok(MergeFileOutcome::Conflicted(conflict.to_string()))
        }
    }
}

fn parse_side(text: &str) -> Option<Tick> {
    // An empty side means the tick did not exist at that point (add/add or
    // delete); the driver cannot reconcile those automatically.
    if text.trim().is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}

fn write_conflict_markers(path: &Path, ours: &str, theirs: &str) -> std::io::Result<()> {
    let mut out = String::new();
    out.push_str("<<<<<<< ours\n");
    out.push_str(ours);
    if !ours.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("=======\n");
    out.push_str(theirs);
    if !theirs.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(">>>>>>> theirs\n");
    fs::write(path, out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Awaiting, TickType, Verdict};
    use chrono::{Duration, Utc};

    fn base_tick() -> Tick {
        let mut t = Tick::new("a1b", "merge target", TickType::Task, "alice");
        t.labels = vec!["x".into()];
        t
    }

    #[test]
    fn disjoint_edits_both_land() {
        let base = base_tick();
        let t0 = base.updated_at;

        let mut ours = base.clone();
        ours.add_label("y");
        ours.updated_at = t0 + Duration::seconds(1);

        let mut theirs = base.clone();
        theirs.notes = "[2026-01-01T00:00:00Z] a note\n".into();
        theirs.updated_at = t0 + Duration::seconds(2);

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        assert_eq!(merged.labels, vec!["x".to_string(), "y".to_string()]);
        assert!(merged.notes.contains("a note"));
        assert_eq!(merged.updated_at, theirs.updated_at);
    }

    #[test]
    fn scalar_conflict_later_writer_wins() {
        let base = base_tick();
        let t0 = base.updated_at;

        let mut ours = base.clone();
        ours.close("fixed");
        ours.updated_at = t0 + Duration::seconds(2);

        let mut theirs = base.clone();
        theirs.title = "renamed".into();
        theirs.updated_at = t0 + Duration::seconds(1);

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        assert_eq!(merged.status, Status::Closed);
        assert_eq!(merged.closed_at, ours.closed_at);
        assert_eq!(merged.closed_reason, "fixed");
        // Theirs' unrelated title edit still lands.
        assert_eq!(merged.title, "renamed");
    }

    #[test]
    fn single_side_edit_wins_regardless_of_timestamp() {
        let base = base_tick();
        let t0 = base.updated_at;

        // Ours is later overall but only theirs touched the description.
        let mut ours = base.clone();
        ours.priority = 0;
        ours.updated_at = t0 + Duration::seconds(5);

        let mut theirs = base.clone();
        theirs.description = "expanded".into();
        theirs.updated_at = t0 + Duration::seconds(1);

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        assert_eq!(merged.priority, 0);
        assert_eq!(merged.description, "expanded");
    }

    #[test]
    fn equal_timestamps_prefer_ours() {
        let base = base_tick();
        let mut ours = base.clone();
        ours.title = "ours title".into();
        let mut theirs = base.clone();
        theirs.title = "theirs title".into();
        theirs.updated_at = ours.updated_at;

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        assert_eq!(merged.title, "ours title");
    }

    #[test]
    fn set_deletions_propagate() {
        let mut base = base_tick();
        base.labels = vec!["a".into(), "b".into(), "c".into()];

        let mut ours = base.clone();
        ours.labels = vec!["a".into(), "c".into(), "d".into()]; // -b +d

        let mut theirs = base.clone();
        theirs.labels = vec!["a".into(), "b".into(), "e".into()]; // -c +e

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        assert_eq!(
            merged.labels,
            vec!["a".to_string(), "d".to_string(), "e".to_string()]
        );
    }

    #[test]
    fn blocked_by_keeps_ours_order() {
        let base = base_tick();
        let mut ours = base.clone();
        ours.blocked_by = vec!["m1n".into(), "p2q".into()];
        let mut theirs = base.clone();
        theirs.blocked_by = vec!["z9z".into()];

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        assert_eq!(
            merged.blocked_by,
            vec!["m1n".to_string(), "p2q".to_string(), "z9z".to_string()]
        );
    }

    #[test]
    fn set_merge_commutes_at_equal_timestamps() {
        let base = base_tick();
        let mut ours = base.clone();
        ours.labels = vec!["x".into(), "y".into()];
        let mut theirs = base.clone();
        theirs.labels = vec!["x".into(), "z".into()];
        theirs.updated_at = ours.updated_at;

        let ab = merge_ticks(&base, &ours, &theirs).unwrap();
        let ba = merge_ticks(&base, &theirs, &ours).unwrap();
        let mut l1 = ab.labels.clone();
        let mut l2 = ba.labels.clone();
        l1.sort();
        l2.sort();
        assert_eq!(l1, l2);
    }

    #[test]
    fn identical_appended_note_emitted_once() {
        let mut base = base_tick();
        base.notes = "[2026-01-01T00:00:00Z] start\n".into();

        let same = "[2026-01-02T00:00:00Z] same line\n";
        let mut ours = base.clone();
        ours.notes.push_str(same);
        let mut theirs = base.clone();
        theirs.notes.push_str(same);
        theirs.notes.push_str("[2026-01-03T00:00:00Z] extra\n");

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        assert_eq!(merged.notes.matches("same line").count(), 1);
        assert!(merged.notes.contains("extra"));
    }

    #[test]
    fn divergent_notes_sorted_by_timestamp() {
        let base = base_tick();
        let mut ours = base.clone();
        ours.notes = "[2026-01-05T00:00:00Z] later\n".into();
        let mut theirs = base.clone();
        theirs.notes = "[2026-01-02T00:00:00Z] earlier\n".into();

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        let lines: Vec<&str> = merged.notes.lines().collect();
        assert!(lines[0].contains("earlier"));
        assert!(lines[1].contains("later"));
    }

    #[test]
    fn contradictory_close_is_an_error() {
        let base = base_tick();
        let mut ours = base.clone();
        ours.close("because A");
        let mut theirs = base.clone();
        theirs.close("because B");
        theirs.updated_at = ours.updated_at;
        theirs.closed_at = ours.closed_at;

        assert!(matches!(
            merge_ticks(&base, &ours, &theirs),
            Err(MergeConflict::ContradictoryClose { .. })
        ));
    }

    #[test]
    fn close_vs_awaiting_later_wins_as_group() {
        let base = base_tick();
        let t0 = base.updated_at;

        let mut ours = base.clone();
        ours.set_awaiting(Awaiting::Approval);
        ours.verdict = Some(Verdict::Approved);
        ours.updated_at = t0 + Duration::seconds(1);

        let mut theirs = base.clone();
        theirs.close("done");
        theirs.updated_at = t0 + Duration::seconds(2);

        let merged = merge_ticks(&base, &ours, &theirs).unwrap();
        assert_eq!(merged.status, Status::Closed);
        assert_eq!(merged.awaiting, None);
        assert_eq!(merged.verdict, None);
    }

    // -- merge_file ----------------------------------------------------------

    fn write_tick(dir: &std::path::Path, name: &str, tick: &Tick) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(tick).unwrap()).unwrap();
        path
    }

    #[test]
    fn merge_file_clean_writes_ours() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_tick();
        let mut ours = base.clone();
        ours.add_label("y");
        ours.updated_at = base.updated_at + Duration::seconds(1);
        let mut theirs = base.clone();
        theirs.priority = 0;
        theirs.updated_at = base.updated_at + Duration::seconds(2);

        let b = write_tick(dir.path(), "base.json", &base);
        let o = write_tick(dir.path(), "ours.json", &ours);
        let t = write_tick(dir.path(), "theirs.json", &theirs);

        let outcome = merge_file(&b, &o, &t, ".tick/issues/a1b.json").unwrap();
        assert!(outcome.is_clean());

        let merged: Tick = serde_json::from_str(&fs::read_to_string(&o).unwrap()).unwrap();
        assert!(merged.labels.contains(&"y".to_string()));
        assert_eq!(merged.priority, 0);
    }

    #[test]
    fn merge_file_unparseable_side_writes_markers() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_tick();
        let b = write_tick(dir.path(), "base.json", &base);
        let o = dir.path().join("ours.json");
        fs::write(&o, "{ broken").unwrap();
        let t = write_tick(dir.path(), "theirs.json", &base);

        let outcome = merge_file(&b, &o, &t, "a1b.json").unwrap();
        assert!(!outcome.is_clean());
        let text = fs::read_to_string(&o).unwrap();
        assert!(text.contains("<<<<<<< ours"));
        assert!(text.contains(">>>>>>> theirs"));
    }

    #[test]
    fn merge_file_contradiction_writes_markers() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_tick();
        let mut ours = base.clone();
        ours.close("because A");
        let mut theirs = base.clone();
        theirs.close("because B");
        theirs.updated_at = ours.updated_at;

        let b = write_tick(dir.path(), "base.json", &base);
        let o = write_tick(dir.path(), "ours.json", &ours);
        let t = write_tick(dir.path(), "theirs.json", &theirs);

        let outcome = merge_file(&b, &o, &t, "a1b.json").unwrap();
        assert!(matches!(outcome, MergeFileOutcome::Conflicted(_)));
        assert!(fs::read_to_string(&o).unwrap().contains("======="));
    }
}
