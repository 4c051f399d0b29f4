use tk_agent::RecordStore;

use super::{open_store, UsageError};

/// `ticks gc`: prune run records (and their event logs) finalized more
/// than `days` ago. Checkpoints and issues are never touched.
pub fn run(days: i64) -> anyhow::Result<i32> {
    if days < 1 {
        return Err(UsageError("--days must be at least 1".into()).into());
    }
    let store = open_store()?;
    let records = RecordStore::for_store(&store);
    let pruned = records.prune(chrono::Duration::days(days))?;
    println!("pruned {} run record(s)", pruned.len());
    Ok(0)
}
