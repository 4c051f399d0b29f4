//! End-to-end lifecycle over the public API: store, readiness-relevant
//! fields, gates, verdicts, and the merge driver cooperating on real files.

use tk_core::approval::{self, CloseOutcome};
use tk_core::merge::{merge_file, MergeFileOutcome};
use tk_core::store::TickStore;
use tk_core::types::{Awaiting, Requires, Status, Tick, TickType};

fn store() -> (tempfile::TempDir, TickStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = TickStore::new(dir.path());
    store.ensure().unwrap();
    (dir, store)
}

#[tokio::test]
async fn gated_task_full_cycle() {
    let (_dir, store) = store();

    let mut epic = Tick::new("e1c", "payments epic", TickType::Epic, "alice");
    epic.project = Some("octo/widgets".into());
    store.write(&epic).unwrap();

    let mut task = Tick::new("t1a", "add refunds", TickType::Task, "alice");
    task.parent = Some("e1c".into());
    task.requires = Some(Requires::Review);
    store.write(&task).unwrap();

    // Close attempt routes through the gate.
    let outcome = approval::route_close(&store, "t1a", Some("done"), false)
        .await
        .unwrap();
    assert_eq!(outcome, CloseOutcome::Routed(Awaiting::Review));
    assert_eq!(store.read("t1a").unwrap().status, Status::Open);

    // Rejection returns it to work with feedback on disk.
    assert!(!approval::reject(&store, "t1a", Some("edge cases missing")).unwrap());
    let t = store.read("t1a").unwrap();
    assert!(t.notes.contains("edge cases missing"));
    assert_eq!(t.awaiting, None);

    // Second round passes review.
    let outcome = approval::route_close(&store, "t1a", None, false).await.unwrap();
    assert_eq!(outcome, CloseOutcome::Routed(Awaiting::Review));
    assert!(approval::approve(&store, "t1a").unwrap());
    assert_eq!(store.read("t1a").unwrap().status, Status::Closed);

    // Epic closes now that its child is closed.
    let outcome = approval::route_close(&store, "e1c", Some("shipped"), false)
        .await
        .unwrap();
    assert_eq!(outcome, CloseOutcome::Closed);

    // The derived index sees both.
    store.save_index().await.unwrap();
    let index = std::fs::read_to_string(store.index_path()).unwrap();
    assert!(index.contains("t1a"));
    assert!(index.contains("e1c"));
}

#[test]
fn merge_driver_reconciles_concurrent_branch_edits() {
    let dir = tempfile::tempdir().unwrap();

    let mut base = Tick::new("a1b", "shared tick", TickType::Task, "alice");
    base.labels = vec!["core".into()];

    // Branch one adds a label and a note.
    let mut ours = base.clone();
    ours.add_label("backend");
    ours.append_note("started implementation", None);

    // Branch two bumps priority and closes.
    let mut theirs = base.clone();
    theirs.priority = 0;
    theirs.close("fixed upstream");

    let write = |name: &str, t: &Tick| {
        let path = dir.path().join(name);
        std::fs::write(&path, serde_json::to_string_pretty(t).unwrap()).unwrap();
        path
    };
    let base_path = write("base.json", &base);
    let ours_path = write("ours.json", &ours);
    let theirs_path = write("theirs.json", &theirs);

    let outcome = merge_file(
        &base_path,
        &ours_path,
        &theirs_path,
        ".tick/issues/a1b.json",
    )
    .unwrap();
    assert_eq!(outcome, MergeFileOutcome::Merged);

    let merged: Tick =
        serde_json::from_str(&std::fs::read_to_string(&ours_path).unwrap()).unwrap();
    assert!(merged.labels.contains(&"backend".to_string()));
    assert!(merged.notes.contains("started implementation"));
    assert_eq!(merged.priority, 0);
    assert_eq!(merged.status, Status::Closed);
    assert_eq!(merged.closed_reason, "fixed upstream");
    merged.validate().unwrap();
}
