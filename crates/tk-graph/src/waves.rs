use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tk_core::types::{Status, Tick};
use tracing::warn;

// ---------------------------------------------------------------------------
// WavePlan
// ---------------------------------------------------------------------------

/// The parallelization schedule for an epic's tasks: each wave is a maximal
/// set of tasks with no unsatisfied dependencies on later waves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavePlan {
    pub waves: Vec<Vec<String>>,
    /// Size of the widest wave.
    pub max_parallel: usize,
    /// Number of waves — the length of the longest dependency chain.
    pub critical_path: usize,
    /// Ids stuck in a dependency cycle, emitted as the final wave. A cycle
    /// is an anomaly worth reporting, not a fatal condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// compute_waves
// ---------------------------------------------------------------------------

/// Level-wise topological sort of the open tasks.
///
/// Only blockers that are themselves open members of the task set count as
/// edges; closed and unknown blockers are satisfied by definition. Ties
/// inside a wave order by priority then id.
pub fn compute_waves(tasks: &[Tick]) -> WavePlan {
    let open: Vec<&Tick> = tasks.iter().filter(|t| t.status != Status::Closed).collect();
    let members: HashSet<&str> = open.iter().map(|t| t.id.as_str()).collect();
    let by_id: HashMap<&str, &Tick> = open.iter().map(|t| (t.id.as_str(), *t)).collect();

    fn deps_of<'a>(t: &'a Tick, members: &HashSet<&str>) -> Vec<&'a str> {
        t.blocked_by
            .iter()
            .map(String::as_str)
            .filter(|b| members.contains(b))
            .collect()
    }

    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&str> = open.iter().map(|t| t.id.as_str()).collect();
    let mut waves: Vec<Vec<String>> = Vec::new();

    while !remaining.is_empty() {
        let mut wave: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| {
                deps_of(by_id[id], &members).iter().all(|d| placed.contains(d))
            })
            .collect();

        if wave.is_empty() {
            // Every remaining task waits on another remaining task: a cycle.
            sort_wave(&mut remaining, &by_id);
            warn!(ids = ?remaining, "dependency cycle detected");
            let cycle: Vec<String> = remaining.iter().map(|s| s.to_string()).collect();
            waves.push(cycle.clone());
            let max_parallel = waves.iter().map(Vec::len).max().unwrap_or(0);
            let critical_path = waves.len();
            return WavePlan {
                waves,
                max_parallel,
                critical_path,
                cycle: Some(cycle),
            };
        }

        sort_wave(&mut wave, &by_id);
        for id in &wave {
            placed.insert(id);
        }
        remaining.retain(|id| !placed.contains(id));
        waves.push(wave.into_iter().map(str::to_string).collect());
    }

    let max_parallel = waves.iter().map(Vec::len).max().unwrap_or(0);
    let critical_path = waves.len();
    WavePlan {
        waves,
        max_parallel,
        critical_path,
        cycle: None,
    }
}

fn sort_wave(ids: &mut [&str], by_id: &HashMap<&str, &Tick>) {
    ids.sort_by(|a, b| {
        let ta = by_id[a];
        let tb = by_id[b];
        ta.priority.cmp(&tb.priority).then(a.cmp(b))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
