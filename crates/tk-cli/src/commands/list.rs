use std::collections::BTreeMap;

use tk_core::types::{Status, Tick, TickType};
use tk_graph::{blocked as blocked_of, compute_waves, ready, sort_by_priority_created_at, Filter, TaskGraph};

use super::{open_store, parse_awaiting_filter, parse_status, parse_type, print_json, print_tick_line};

#[allow(clippy::too_many_arguments)]
pub async fn list(
    owner: Option<String>,
    status: Option<String>,
    priority: Option<u8>,
    tick_type: Option<String>,
    label: Option<String>,
    parent: Option<String>,
    awaiting: Option<String>,
    all: bool,
    json: bool,
) -> anyhow::Result<i32> {
    let store = open_store()?;
    let universe = store.list().await?;

    let mut filter = Filter::new();
    filter.owner = owner;
    filter.status = status.as_deref().map(parse_status).transpose()?;
    filter.priority = priority;
    filter.tick_type = tick_type.as_deref().map(parse_type).transpose()?;
    filter.label = label;
    filter.parent = parent;
    filter.awaiting = awaiting.as_deref().map(parse_awaiting_filter).transpose()?;

    let mut ticks = filter.apply(&universe);
    if !all && filter.status.is_none() {
        ticks.retain(|t| !t.is_closed());
    }
    sort_by_priority_created_at(&mut ticks);

    if json {
        print_json(&ticks)?;
    } else {
        for t in &ticks {
            print_tick_line(t);
        }
    }
    Ok(0)
}

pub async fn blocked(json: bool) -> anyhow::Result<i32> {
    let store = open_store()?;
    let universe = store.list().await?;
    let mut ticks = blocked_of(&universe, &universe);
    sort_by_priority_created_at(&mut ticks);

    if json {
        print_json(&ticks)?;
    } else {
        for t in &ticks {
            print_tick_line(t);
        }
    }
    Ok(0)
}

pub async fn next(json: bool) -> anyhow::Result<i32> {
    let store = open_store()?;
    let universe = store.list().await?;
    let mut ready_set = ready(&universe, &universe);
    sort_by_priority_created_at(&mut ready_set);

    match ready_set.first() {
        Some(t) if json => print_json(t)?,
        Some(t) => print_tick_line(t),
        None => println!("nothing is ready"),
    }
    Ok(0)
}

pub async fn stats(json: bool) -> anyhow::Result<i32> {
    let store = open_store()?;
    let universe = store.list().await?;

    let count_by = |f: &dyn Fn(&Tick) -> String| -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for t in &universe {
            *counts.entry(f(t)).or_insert(0) += 1;
        }
        counts
    };
    let by_status = count_by(&|t| t.status.as_str().to_string());
    let by_type = count_by(&|t| t.tick_type.as_str().to_string());
    let by_priority = count_by(&|t| format!("p{}", t.priority));

    if json {
        print_json(&serde_json::json!({
            "total": universe.len(),
            "by_status": by_status,
            "by_type": by_type,
            "by_priority": by_priority,
        }))?;
    } else {
        println!("total: {}", universe.len());
        for (section, counts) in [("status", by_status), ("type", by_type), ("priority", by_priority)] {
            let line: Vec<String> = counts.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!("{section}: {}", line.join(" "));
        }
    }
    Ok(0)
}

pub async fn graph(epic: Option<&str>, json: bool) -> anyhow::Result<i32> {
    let store = open_store()?;
    let universe = store.list().await?;

    let tasks: Vec<Tick> = match epic {
        Some(epic_id) => {
            let epic_tick = store.read(epic_id)?;
            if epic_tick.tick_type == TickType::Epic {
                universe
                    .iter()
                    .filter(|t| t.parent.as_deref() == Some(epic_id))
                    .cloned()
                    .collect()
            } else {
                vec![epic_tick]
            }
        }
        None => universe
            .iter()
            .filter(|t| t.status != Status::Closed)
            .cloned()
            .collect(),
    };

    let graph = TaskGraph::build(epic, &tasks, &universe);
    if json {
        print_json(&graph)?;
        return Ok(0);
    }

    let plan = compute_waves(&tasks);
    for (i, wave) in plan.waves.iter().enumerate() {
        println!("wave {}: {}", i + 1, wave.join(" "));
    }
    println!(
        "max parallel: {}; critical path: {}",
        plan.max_parallel, plan.critical_path
    );
    if let Some(cycle) = &plan.cycle {
        // Informational: the schedule above is still usable.
        println!("warning: dependency cycle among {}", cycle.join(", "));
    }
    for node in graph.nodes.values() {
        if node.agent_ready {
            println!("ready: {}", node.id);
        }
    }
    Ok(0)
}
