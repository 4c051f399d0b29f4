use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use tk_agent::{AgentInvoker, AgentRequest};
use tk_core::store::TickStore;
use tk_core::types::Tick;

/// Author stamped on blocker edges this pass inserts.
const PREDICTOR_AUTHOR: &str = "dependency-analyzer";

/// Default budget for the prediction prompt.
pub const DEFAULT_PREDICT_TIMEOUT: Duration = Duration::from_secs(180);

// ---------------------------------------------------------------------------
// PredictedConflict
// ---------------------------------------------------------------------------

/// Two tasks predicted to touch the same files. The earlier task (by input
/// order) becomes the blocker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictedConflict {
    pub earlier: String,
    pub later: String,
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FilePrediction {
    task_id: String,
    #[serde(default)]
    files: Vec<String>,
}

// ---------------------------------------------------------------------------
// predict_and_link
// ---------------------------------------------------------------------------

/// Optional pre-pass before scheduling an epic's tasks in parallel: ask the
/// agent which files each task will touch, derive conflicts, and insert
/// blocker edges so conflicting tasks serialize.
///
/// This pass is advisory and must never sink the schedule: a malformed
/// response, a missing `<file_predictions>` block, an agent error, or a
/// timeout all yield "no conflicts" with a warning.
pub async fn predict_and_link(
    store: &TickStore,
    agent: &dyn AgentInvoker,
    epic: &Tick,
    tasks: &[Tick],
    timeout: Duration,
) -> Result<Vec<PredictedConflict>, tk_core::store::StoreError> {
    if tasks.len() < 2 {
        return Ok(Vec::new());
    }

    let request = AgentRequest {
        tick_id: epic.id.clone(),
        prompt: build_prompt(epic, tasks),
        working_dir: store.repo_root().to_path_buf(),
        timeout,
    };

    let response = match tokio::time::timeout(timeout, agent.invoke(request, None)).await {
        Ok(Ok(outcome)) => outcome.output,
        Ok(Err(e)) => {
            warn!(epic_id = %epic.id, error = %e, "file prediction failed; assuming no conflicts");
            return Ok(Vec::new());
        }
        Err(_) => {
            warn!(epic_id = %epic.id, "file prediction timed out; assuming no conflicts");
            return Ok(Vec::new());
        }
    };

    let Some(predictions) = parse_predictions(&response) else {
        warn!(epic_id = %epic.id, "no parseable <file_predictions> block; assuming no conflicts");
        return Ok(Vec::new());
    };

    let conflicts = conflicts_from_predictions(tasks, &predictions);
    persist_edges(store, &conflicts)?;
    Ok(conflicts)
}

fn build_prompt(epic: &Tick, tasks: &[Tick]) -> String {
    let mut prompt = format!(
        "The following tasks under epic {} ({}) are about to run in parallel.\n\
         For each task, predict which repository files it will create or modify.\n\n",
        epic.id, epic.title
    );
    for t in tasks {
        prompt.push_str(&format!("- {}: {}\n", t.id, t.title));
        if !t.description.is_empty() {
            prompt.push_str(&format!("  {}\n", t.description));
        }
    }
    prompt.push_str(
        "\nRespond with a tagged block of JSON, exactly:\n\
         <file_predictions>\n\
         [{\"task_id\": \"...\", \"files\": [\"path/one\", \"path/two\"]}]\n\
         </file_predictions>\n",
    );
    prompt
}

/// Extract and parse the `<file_predictions>` block; `None` when absent or
/// malformed.
fn parse_predictions(output: &str) -> Option<Vec<FilePrediction>> {
    let start = output.find("<file_predictions>")? + "<file_predictions>".len();
    let end = output[start..].find("</file_predictions>")? + start;
    serde_json::from_str(output[start..end].trim()).ok()
}

/// Build the file → tasks inverted index and aggregate conflicting pairs,
/// ordered by appearance in the input task list.
fn conflicts_from_predictions(
    tasks: &[Tick],
    predictions: &[FilePrediction],
) -> Vec<PredictedConflict> {
    let position: BTreeMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    let mut by_file: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for p in predictions {
        if !position.contains_key(p.task_id.as_str()) {
            continue; // a hallucinated task id
        }
        for f in &p.files {
            let entry = by_file.entry(f.as_str()).or_default();
            if !entry.contains(&p.task_id.as_str()) {
                entry.push(p.task_id.as_str());
            }
        }
    }

    // Pair → shared files, deduplicated and aggregated.
    let mut pairs: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for (file, task_ids) in &by_file {
        if task_ids.len() < 2 {
            continue;
        }
        for i in 0..task_ids.len() {
            for j in (i + 1)..task_ids.len() {
                let (a, b) = (task_ids[i], task_ids[j]);
                let (earlier, later) = if position[a] <= position[b] {
                    (a, b)
                } else {
                    (b, a)
                };
                let files = pairs
                    .entry((earlier.to_string(), later.to_string()))
                    .or_default();
                if !files.contains(&file.to_string()) {
                    files.push(file.to_string());
                }
            }
        }
    }

    pairs
        .into_iter()
        .map(|((earlier, later), files)| PredictedConflict {
            earlier,
            later,
            files,
        })
        .collect()
}

/// Insert `blocked_by` edges for each conflict, skipping relations that
/// already exist, and persist via the store under the analyzer author.
fn persist_edges(
    store: &TickStore,
    conflicts: &[PredictedConflict],
) -> Result<(), tk_core::store::StoreError> {
    for conflict in conflicts {
        let mut later = store.read(&conflict.later)?;
        if later.blocked_by.contains(&conflict.earlier) {
            continue;
        }
        later.add_blocker(conflict.earlier.clone());
        store.write_as(&later, PREDICTOR_AUTHOR)?;
        info!(
            earlier = %conflict.earlier,
            later = %conflict.later,
            files = ?conflict.files,
            "predicted file conflict; dependency inserted"
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
