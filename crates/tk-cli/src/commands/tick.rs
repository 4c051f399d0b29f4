use std::collections::HashSet;
use std::io::Write as _;

use chrono::{DateTime, Utc};

use tk_core::approval::{route_close, CloseOutcome};
use tk_core::config::TickConfig;
use tk_core::id::mint_id;
use tk_core::project::whoami;
use tk_core::repo::RealGitRunner;
use tk_core::types::Tick;

use super::{
    open_store, parse_requires, parse_status, parse_type, print_json, print_tick_line, UsageError,
};

#[allow(clippy::too_many_arguments)]
pub async fn create(
    title: String,
    description: String,
    tick_type: String,
    priority: u8,
    parent: Option<String>,
    requires: Option<String>,
    labels: Vec<String>,
    blocked_by: Vec<String>,
    json: bool,
) -> anyhow::Result<i32> {
    let store = open_store()?;
    let config = TickConfig::load(store.repo_root())?;
    if priority > 4 {
        return Err(UsageError("priority must be 0-4".into()).into());
    }
    let tick_type = parse_type(&tick_type)?;
    let requires = requires.as_deref().map(parse_requires).transpose()?;

    let existing: HashSet<String> = store.list().await?.into_iter().map(|t| t.id).collect();
    let id = mint_id(&existing, config.id_length);
    let owner = whoami(store.repo_root(), &RealGitRunner);

    let mut tick = Tick::new(&id, title, tick_type, owner);
    tick.description = description;
    tick.priority = priority;
    tick.requires = requires;
    for label in labels {
        tick.add_label(label);
    }
    for blocker in blocked_by {
        tick.add_blocker(blocker);
    }
    if let Some(parent_id) = parent {
        let parent_tick = store.read(&parent_id)?;
        // Project is inherited from the parent at creation when unset.
        tick.project = parent_tick.project.clone();
        tick.parent = Some(parent_id);
    }
    store.write(&tick)?;
    store.save_index().await?;

    if json {
        print_json(&tick)?;
    } else {
        println!("{id}");
    }
    Ok(0)
}

pub fn show(id: &str, json: bool) -> anyhow::Result<i32> {
    let store = open_store()?;
    let tick = store.read(id)?;
    if json {
        print_json(&tick)?;
    } else {
        print_tick_line(&tick);
        if !tick.description.is_empty() {
            println!("\n{}", tick.description);
        }
        if let Some(gate) = tick.requires {
            println!("requires: {:?}", gate);
        }
        if !tick.notes.is_empty() {
            println!("\nnotes:\n{}", tick.notes.trim_end());
        }
    }
    Ok(0)
}

#[allow(clippy::too_many_arguments)]
pub fn update(
    id: &str,
    title: Option<String>,
    description: Option<String>,
    priority: Option<u8>,
    owner: Option<String>,
    status: Option<String>,
    defer_until: Option<String>,
    requires: Option<String>,
) -> anyhow::Result<i32> {
    let store = open_store()?;
    let mut tick = store.read(id)?;

    if let Some(title) = title {
        tick.title = title;
    }
    if let Some(description) = description {
        tick.description = description;
    }
    if let Some(priority) = priority {
        if priority > 4 {
            return Err(UsageError("priority must be 0-4".into()).into());
        }
        tick.priority = priority;
    }
    if let Some(owner) = owner {
        tick.owner = owner;
    }
    if let Some(status) = status {
        let status = parse_status(&status)?;
        if status == tk_core::types::Status::Closed {
            return Err(
                UsageError("use `ticks close` to close (gates apply)".into()).into(),
            );
        }
        tick.status = status;
    }
    if let Some(defer) = defer_until {
        let when: DateTime<Utc> = defer
            .parse()
            .map_err(|_| UsageError(format!("invalid timestamp `{defer}`")))?;
        tick.defer_until = Some(when);
    }
    if let Some(gate) = requires {
        tick.requires = Some(parse_requires(&gate)?);
    }

    tick.touch();
    store.write(&tick)?;
    Ok(0)
}

pub async fn close(id: &str, reason: Option<&str>, force: bool) -> anyhow::Result<i32> {
    let store = open_store()?;
    match route_close(&store, id, reason, force).await? {
        CloseOutcome::Closed => {
            println!("{id} closed");
            Ok(0)
        }
        CloseOutcome::Routed(awaiting) => {
            println!(
                "{id} now awaiting {}; resolve with `ticks approve {id}` or `ticks reject {id}`",
                awaiting.as_str()
            );
            Ok(0)
        }
        CloseOutcome::ChildrenOpen(children) => Err(anyhow::anyhow!(
            "epic {id} has open children ({}); close them or pass --force",
            children.join(", ")
        )),
    }
}

pub fn reopen(id: &str) -> anyhow::Result<i32> {
    let store = open_store()?;
    let mut tick = store.read(id)?;
    tick.reopen();
    store.write(&tick)?;
    println!("{id} reopened");
    Ok(0)
}

pub fn block(id: &str, blocker: &str, add: bool) -> anyhow::Result<i32> {
    let store = open_store()?;
    let mut tick = store.read(id)?;
    if add {
        // The blocker may be a dangling id, but creating an edge to a tick
        // we know nothing about is almost always a typo.
        store.read(blocker)?;
        tick.add_blocker(blocker);
    } else {
        tick.remove_blocker(blocker);
    }
    store.write(&tick)?;
    Ok(0)
}

pub fn note(id: &str, text: Option<String>) -> anyhow::Result<i32> {
    let store = open_store()?;
    let mut tick = store.read(id)?;

    let text = match text {
        Some(text) => text,
        None => editor_note()?,
    };
    if text.trim().is_empty() {
        return Err(UsageError("empty note".into()).into());
    }
    tick.append_note(text.trim(), Some("[human]"));
    store.write(&tick)?;
    Ok(0)
}

pub fn notes(id: &str) -> anyhow::Result<i32> {
    let store = open_store()?;
    let tick = store.read(id)?;
    print!("{}", tick.notes);
    Ok(0)
}

/// Collect a note via $EDITOR on a temp file.
fn editor_note() -> anyhow::Result<String> {
    let editor = std::env::var("EDITOR")
        .map_err(|_| UsageError("no note text given and EDITOR is unset".into()))?;

    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file)?;
    let path = file.path().to_path_buf();

    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("{editor} {}", path.display()))
        .status()?;
    if !status.success() {
        return Err(UsageError("editor exited non-zero; note discarded".into()).into());
    }
    Ok(std::fs::read_to_string(&path)?)
}
