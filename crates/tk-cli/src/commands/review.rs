use tk_agent::CheckpointStore;
use tk_core::approval;

use super::{open_store, print_json};

pub fn approve(id: &str) -> anyhow::Result<i32> {
    let store = open_store()?;
    let closed = approval::approve(&store, id)?;
    if closed {
        println!("{id} approved and closed");
    } else {
        println!("{id} approved; returned to the agent");
    }
    Ok(0)
}

pub fn reject(id: &str, message: Option<&str>) -> anyhow::Result<i32> {
    let store = open_store()?;
    let closed = approval::reject(&store, id, message)?;
    if closed {
        println!("{id} rejected and closed");
    } else {
        println!("{id} rejected; returned to the agent");
    }
    Ok(0)
}

pub fn checkpoints(epic: &str, json: bool) -> anyhow::Result<i32> {
    let store = open_store()?;
    let checkpoints = CheckpointStore::for_store(&store).list_for_epic(epic)?;

    if json {
        print_json(&checkpoints)?;
        return Ok(0);
    }
    if checkpoints.is_empty() {
        println!("no checkpoints for {epic}");
        return Ok(0);
    }
    for cp in checkpoints {
        println!(
            "{}  iter {:>3}  {} tasks done  {} tokens  ${:.4}{}",
            cp.timestamp.format("%Y-%m-%d %H:%M:%S"),
            cp.iteration,
            cp.completed_tasks.len(),
            cp.total_tokens,
            cp.total_cost,
            cp.git_commit
                .map(|c| format!("  @{}", &c[..c.len().min(8)]))
                .unwrap_or_default()
        );
    }
    Ok(0)
}
