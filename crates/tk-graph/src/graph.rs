use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tk_core::types::{Status, Tick};

use crate::waves::{compute_waves, WavePlan};

// ---------------------------------------------------------------------------
// TaskGraph
// ---------------------------------------------------------------------------

/// Id-keyed adjacency view of a task set, with per-task readiness flags.
/// Ticks are independent records on disk, so the graph is rebuilt from
/// snapshots rather than maintained as live pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    pub nodes: BTreeMap<String, TaskNode>,
    pub plan: WavePlan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub priority: u8,
    /// Not blocked, not awaiting, not deferred, not closed — an agent could
    /// start this task right now.
    pub agent_ready: bool,
    pub blocked_by: Vec<String>,
    pub blocks: Vec<String>,
}

impl TaskGraph {
    /// Build the graph for `tasks`, resolving blocker liveness against
    /// `universe` (which normally is the full tick set).
    pub fn build(epic_id: Option<&str>, tasks: &[Tick], universe: &[Tick]) -> Self {
        let by_id: HashMap<&str, &Tick> = universe.iter().map(|t| (t.id.as_str(), t)).collect();
        let now = Utc::now();

        let open_blocker = |id: &str| by_id.get(id).is_some_and(|t| t.status != Status::Closed);

        let mut blocks: HashMap<&str, Vec<String>> = HashMap::new();
        for t in tasks {
            for b in &t.blocked_by {
                blocks.entry(b.as_str()).or_default().push(t.id.clone());
            }
        }

        let nodes = tasks
            .iter()
            .map(|t| {
                let is_blocked = t.blocked_by.iter().any(|b| open_blocker(b));
                let agent_ready = t.status != Status::Closed
                    && !is_blocked
                    && !t.is_awaiting()
                    && !t.is_deferred(now);
                (
                    t.id.clone(),
                    TaskNode {
                        id: t.id.clone(),
                        title: t.title.clone(),
                        status: t.status,
                        priority: t.priority,
                        agent_ready,
                        blocked_by: t.blocked_by.clone(),
                        blocks: blocks.get(t.id.as_str()).cloned().unwrap_or_default(),
                    },
                )
            })
            .collect();

        Self {
            epic_id: epic_id.map(str::to_string),
            nodes,
            plan: compute_waves(tasks),
        }
    }

    /// Ids of tasks an agent could start right now, in wave order.
    pub fn agent_ready_ids(&self) -> Vec<&str> {
        self.plan
            .waves
            .iter()
            .flatten()
            .filter(|id| self.nodes.get(*id).is_some_and(|n| n.agent_ready))
            .map(String::as_str)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
