use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use tk_agent::budget::{BudgetState, BudgetTracker};
use tk_agent::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use tk_agent::invoker::{AgentError, AgentInvoker, AgentRequest, OutputSink};
use tk_agent::record::{RecordError, RecordStore, RunRecord};
use tk_core::approval::{self, ApprovalError, CloseOutcome};
use tk_core::config::TickConfig;
use tk_core::store::{StoreError, TickStore};
use tk_core::types::{Awaiting, Tick, TickType};
use tk_core::worktree::{WorktreeError, WorktreeInfo, WorktreeManager};
use tk_graph::readiness::{ready, sort_by_priority_created_at};

use crate::cancel::CancelToken;
use crate::verify::Verifier;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

pub type Result<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Signal / RunOptions / RunOutcome
// ---------------------------------------------------------------------------

/// Why a run ended, beyond the free-text exit reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    None,
    Cancelled,
    Budget,
    Timeout,
    MaxRetries,
    Completed,
    NoReadyTask,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub epic_id: String,
    pub max_iterations: u32,
    pub max_cost: Option<f64>,
    pub checkpoint_interval: u32,
    pub max_task_retries: u32,
    pub agent_timeout: Duration,
    pub skip_verify: bool,
    pub use_worktree: bool,
    pub watch: bool,
    /// How often watch mode re-polls readiness. Distinct from the sync
    /// watcher's echo window; the two must not be merged.
    pub watch_poll_interval: Duration,
    /// Settling time after watch mode notices a ready task, so bursts of
    /// edits coalesce into one restart.
    pub debounce_interval: Duration,
}

impl RunOptions {
    pub fn new(epic_id: impl Into<String>) -> Self {
        Self {
            epic_id: epic_id.into(),
            max_iterations: 50,
            max_cost: None,
            checkpoint_interval: 5,
            max_task_retries: 2,
            agent_timeout: Duration::from_secs(20 * 60),
            skip_verify: false,
            use_worktree: false,
            watch: false,
            watch_poll_interval: Duration::from_secs(30),
            debounce_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub epic_id: String,
    pub iterations: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub duration: Duration,
    pub completed_tasks: Vec<String>,
    pub exit_reason: String,
    pub signal: Signal,
    pub signal_reason: String,
}

// ---------------------------------------------------------------------------
// RunEngine
// ---------------------------------------------------------------------------

/// Drives the agent capability over one epic's tasks, single-threaded per
/// epic. One iteration is one agent invocation; the engine owns the live
/// run record, budget accounting, checkpoint cadence, retries, and the
/// worktree lifecycle when isolation is on.
pub struct RunEngine {
    store: TickStore,
    records: RecordStore,
    checkpoints: CheckpointStore,
    agent: Arc<dyn AgentInvoker>,
    verifier: Option<Arc<dyn Verifier>>,
    cancel: CancelToken,
    on_output: Option<OutputSink>,
}

impl RunEngine {
    pub fn new(store: TickStore, agent: Arc<dyn AgentInvoker>) -> Self {
        let records = RecordStore::for_store(&store);
        let checkpoints = CheckpointStore::for_store(&store);
        Self {
            store,
            records,
            checkpoints,
            agent,
            verifier: None,
            cancel: CancelToken::new(),
            on_output: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Stream raw agent output chunks to this sink as they arrive.
    pub fn with_output_sink(mut self, sink: OutputSink) -> Self {
        self.on_output = Some(sink);
        self
    }

    /// The token an OS signal handler should fire to stop the run. The
    /// in-flight iteration drains before the engine exits.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run several epics. Only sequential single-epic execution exists
    /// today; parallel epics are explicitly out of scope.
    pub async fn run_epics(&self, runs: Vec<RunOptions>) -> Result<Vec<RunOutcome>> {
        if runs.len() > 1 {
            return Err(EngineError::NotImplemented("parallel epic execution"));
        }
        let mut outcomes = Vec::new();
        for opts in runs {
            outcomes.push(self.run(opts).await?);
        }
        Ok(outcomes)
    }

    /// Run one epic to a terminal state.
    pub async fn run(&self, opts: RunOptions) -> Result<RunOutcome> {
        let started = Instant::now();
        let epic = self.store.read(&opts.epic_id)?;
        info!(epic_id = %epic.id, watch = opts.watch, worktree = opts.use_worktree, "run starting");

        let worktree = if opts.use_worktree {
            let manager = WorktreeManager::new(self.store.repo_root());
            let info = manager.create(&epic.id)?;
            Some((manager, info))
        } else {
            None
        };
        let working_dir: PathBuf = worktree
            .as_ref()
            .map(|(_, info)| info.path.clone())
            .unwrap_or_else(|| self.store.repo_root().to_path_buf());

        let mut budget = BudgetTracker::new(opts.max_cost);
        let mut completed: Vec<String> = Vec::new();
        let mut retries: HashMap<String, u32> = HashMap::new();
        let mut iterations: u32 = 0;
        let context = load_context(&self.store);

        let (signal, signal_reason) = 'epic: loop {
            if self.cancel.is_cancelled() {
                break (Signal::Cancelled, "interrupt received".to_string());
            }

            let universe = self.store.list().await?;
            let tasks = task_set(&epic, &universe);
            let mut ready_now = ready(&tasks, &universe);
            sort_by_priority_created_at(&mut ready_now);

            let Some(next) = ready_now.into_iter().next() else {
                if opts.watch {
                    if !self.wait_for_ready(&epic, &opts).await? {
                        break (Signal::Cancelled, "interrupt received while watching".to_string());
                    }
                    continue 'epic;
                }
                if tasks.iter().all(Tick::is_closed) {
                    break (Signal::Completed, "all tasks closed".to_string());
                }
                break (
                    Signal::NoReadyTask,
                    "no agent-ready task remains".to_string(),
                );
            };
            let task_id = next.id.clone();

            {
                let mut t = self.store.read(&task_id)?;
                if t.status == tk_core::types::Status::Open {
                    t.status = tk_core::types::Status::InProgress;
                    t.touch();
                    self.store.write_as(&t, "engine")?;
                }
            }
            info!(task_id = %task_id, "task selected");

            // One pass of this loop is one agent invocation.
            loop {
                if self.cancel.is_cancelled() {
                    break 'epic (Signal::Cancelled, "interrupt received".to_string());
                }
                if iterations >= opts.max_iterations {
                    break 'epic (
                        Signal::None,
                        format!("iteration limit {} reached", opts.max_iterations),
                    );
                }
                iterations += 1;

                let current = self.store.read(&task_id)?;
                let mut record = RunRecord::begin(&task_id);
                self.records.write_live(&record)?;
                let _ = self.records.append_run_event(
                    &task_id,
                    &serde_json::json!({
                        "event": "iteration_start",
                        "iteration": iterations,
                        "at": chrono::Utc::now(),
                    }),
                );

                let prompt = build_prompt(&current, &context);
                // Keep the last prompt around for inspection and reruns.
                let _ = std::fs::write(
                    self.store.context_dir().join(format!("{task_id}.md")),
                    &prompt,
                );
                let request = AgentRequest {
                    tick_id: task_id.clone(),
                    prompt,
                    working_dir: working_dir.clone(),
                    timeout: opts.agent_timeout,
                };

                match self.agent.invoke(request, self.on_output.clone()).await {
                    Ok(outcome) => {
                        record.session_id = outcome.session_id.clone();
                        record.model = outcome.model.clone();
                        record.output = outcome.output.clone();
                        record.thinking = outcome.thinking.clone();
                        record.tool_invocations = outcome.tool_invocations.clone();
                        record.turns = outcome.turns;
                        record.metrics.input_tokens = outcome.usage.input_tokens;
                        record.metrics.output_tokens = outcome.usage.output_tokens;
                        record.metrics.cost_usd = outcome.usage.cost_usd;
                        record.success = outcome.task_complete;
                        self.records.write_live(&record)?;

                        let budget_state = budget.record(&outcome.usage);

                        if opts.checkpoint_interval > 0
                            && iterations % opts.checkpoint_interval == 0
                        {
                            self.write_checkpoint(
                                &epic.id,
                                iterations,
                                &budget,
                                &completed,
                                worktree.as_ref(),
                            )?;
                        }

                        if budget_state == BudgetState::Exceeded {
                            let reason = format!(
                                "budget exceeded: ${:.4} spent against ${:.4}",
                                budget.total_cost(),
                                opts.max_cost.unwrap_or_default()
                            );
                            self.note(&task_id, &format!("run stopped: {reason}"))?;
                            self.records.finalize(&mut record)?;
                            break 'epic (Signal::Budget, reason);
                        }

                        if let Some(kind) = outcome.needs_human {
                            let mut t = self.store.read(&task_id)?;
                            t.set_awaiting(kind);
                            self.store.write_as(&t, "engine")?;
                            self.records.finalize(&mut record)?;
                            info!(task_id = %task_id, awaiting = kind.as_str(), "task paused for human");
                            break; // next task
                        }

                        if outcome.task_complete {
                            match self.verify_task(&task_id, &working_dir, &opts).await {
                                TaskVerdict::Passed(summary) => {
                                    record.verification = summary;
                                    self.records.finalize(&mut record)?;
                                    match approval::route_close(
                                        &self.store,
                                        &task_id,
                                        Some("completed by agent"),
                                        false,
                                    )
                                    .await?
                                    {
                                        CloseOutcome::Closed => {
                                            completed.push(task_id.clone());
                                            info!(task_id = %task_id, "task completed");
                                        }
                                        CloseOutcome::Routed(gate) => {
                                            info!(task_id = %task_id, awaiting = gate.as_str(), "completion routed to review");
                                        }
                                        CloseOutcome::ChildrenOpen(_) => {}
                                    }
                                    break; // next task
                                }
                                TaskVerdict::Failed(summary) => {
                                    record.verification = Some(summary.clone());
                                    self.records.finalize(&mut record)?;
                                    match self.bump_retry(
                                        &mut retries,
                                        &task_id,
                                        &opts,
                                        &format!("verification failed: {summary}"),
                                    )? {
                                        RetryDecision::Again => continue,
                                        RetryDecision::GiveUp(reason) => {
                                            break 'epic (Signal::MaxRetries, reason)
                                        }
                                    }
                                }
                            }
                        }

                        // Neither done nor paused: the agent is mid-task.
                        self.records.finalize(&mut record)?;
                    }
                    Err(AgentError::Cancelled) => {
                        self.records.finalize(&mut record)?;
                        break 'epic (Signal::Cancelled, "agent invocation cancelled".to_string());
                    }
                    Err(e) if e.is_transient() => {
                        record.success = false;
                        self.records.finalize(&mut record)?;
                        warn!(task_id = %task_id, error = %e, "transient agent failure");
                        match self.bump_retry(&mut retries, &task_id, &opts, &e.to_string())? {
                            RetryDecision::Again => continue,
                            RetryDecision::GiveUp(reason) => {
                                break 'epic (Signal::MaxRetries, reason)
                            }
                        }
                    }
                    Err(e) => {
                        self.records.finalize(&mut record)?;
                        error!(task_id = %task_id, error = %e, "agent failed terminally");
                        return Err(EngineError::Agent(e));
                    }
                }
            }
        };

        let mut exit_reason = signal_reason.clone();
        if let Some((manager, info)) = &worktree {
            if signal == Signal::Completed {
                if let Some(commit) =
                    manager.commit_all(info, &format!("tick: complete epic {}", epic.id))?
                {
                    info!(commit = %commit, "worktree changes committed");
                }
                let merged = manager.merge_back(info)?;
                if merged.success {
                    if merged.merged {
                        manager.destroy(info, false)?;
                    }
                    exit_reason = match merged.merge_commit {
                        Some(commit) => format!("{signal_reason}; merged back as {commit}"),
                        None => format!("{signal_reason}; nothing to merge back"),
                    };
                } else {
                    exit_reason = format!(
                        "{signal_reason}; merge-back conflicts in {:?} (worktree kept at {})",
                        merged.conflicts,
                        info.path.display()
                    );
                }
            } else {
                exit_reason = format!(
                    "{signal_reason}; worktree kept at {}",
                    info.path.display()
                );
            }
        }

        let outcome = RunOutcome {
            epic_id: epic.id.clone(),
            iterations,
            total_tokens: budget.total_tokens(),
            total_cost: budget.total_cost(),
            duration: started.elapsed(),
            completed_tasks: completed,
            exit_reason,
            signal,
            signal_reason,
        };
        info!(
            epic_id = %outcome.epic_id,
            iterations = outcome.iterations,
            signal = ?outcome.signal,
            "run finished"
        );
        Ok(outcome)
    }

    /// Watch mode: poll readiness, then debounce so bursts of edits
    /// coalesce. Returns false when cancelled.
    async fn wait_for_ready(&self, epic: &Tick, opts: &RunOptions) -> Result<bool> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(opts.watch_poll_interval) => {}
            }
            let universe = self.store.list().await?;
            let tasks = task_set(epic, &universe);
            if !ready(&tasks, &universe).is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(false),
                    _ = tokio::time::sleep(opts.debounce_interval) => {}
                }
                return Ok(true);
            }
        }
    }

    async fn verify_task(
        &self,
        task_id: &str,
        working_dir: &Path,
        opts: &RunOptions,
    ) -> TaskVerdict {
        if opts.skip_verify {
            return TaskVerdict::Passed(None);
        }
        let Some(verifier) = &self.verifier else {
            return TaskVerdict::Passed(None);
        };
        match verifier.verify(task_id, working_dir).await {
            Ok(report) if report.passed => TaskVerdict::Passed(Some("passed".to_string())),
            Ok(report) => TaskVerdict::Failed(report.summary),
            Err(e) => TaskVerdict::Failed(e.to_string()),
        }
    }

    fn bump_retry(
        &self,
        retries: &mut HashMap<String, u32>,
        task_id: &str,
        opts: &RunOptions,
        cause: &str,
    ) -> Result<RetryDecision> {
        let count = retries.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        self.note(
            task_id,
            &format!("retry {}/{}: {cause}", count, opts.max_task_retries),
        )?;
        if *count > opts.max_task_retries {
            let mut t = self.store.read(task_id)?;
            t.set_awaiting(Awaiting::Escalation);
            self.store.write_as(&t, "engine")?;
            return Ok(RetryDecision::GiveUp(format!(
                "task {task_id} failed after {} retries: {cause}",
                opts.max_task_retries
            )));
        }
        Ok(RetryDecision::Again)
    }

    fn write_checkpoint(
        &self,
        epic_id: &str,
        iteration: u32,
        budget: &BudgetTracker,
        completed: &[String],
        worktree: Option<&(WorktreeManager, WorktreeInfo)>,
    ) -> Result<()> {
        let mut checkpoint = Checkpoint::new(epic_id, iteration);
        checkpoint.total_tokens = budget.total_tokens();
        checkpoint.total_cost = budget.total_cost();
        checkpoint.completed_tasks = completed.to_vec();
        if let Some((manager, info)) = worktree {
            checkpoint.worktree_path = Some(info.path.clone());
            checkpoint.git_commit = manager.head_commit(info).ok();
        }
        self.checkpoints.write(&checkpoint)?;
        info!(epic_id, iteration, "checkpoint written");
        Ok(())
    }

    fn note(&self, task_id: &str, text: &str) -> Result<()> {
        let mut t = self.store.read(task_id)?;
        t.append_note(text, None);
        self.store.write_as(&t, "engine")?;
        Ok(())
    }
}

enum TaskVerdict {
    Passed(Option<String>),
    Failed(String),
}

enum RetryDecision {
    Again,
    GiveUp(String),
}

/// The task set the engine schedules: an epic's direct children, or the
/// tick itself when the target is not an epic.
fn task_set(epic: &Tick, universe: &[Tick]) -> Vec<Tick> {
    if epic.tick_type == TickType::Epic {
        universe
            .iter()
            .filter(|t| t.parent.as_deref() == Some(epic.id.as_str()))
            .cloned()
            .collect()
    } else {
        universe
            .iter()
            .filter(|t| t.id == epic.id)
            .cloned()
            .collect()
    }
}

/// Project context files named by `config.context`, concatenated.
/// Unreadable entries are skipped; context is advisory.
fn load_context(store: &TickStore) -> String {
    let config = TickConfig::load(store.repo_root()).unwrap_or_default();
    let Some(context) = config.context else {
        return String::new();
    };
    let mut out = String::new();
    for file in &context.files {
        match std::fs::read_to_string(store.repo_root().join(file)) {
            Ok(text) => {
                out.push_str(&format!("--- {file} ---\n{text}\n"));
            }
            Err(e) => warn!(file, error = %e, "context file unreadable; skipped"),
        }
    }
    out
}

/// The prompt the agent receives for one iteration: project context, the
/// task's fields, plus accumulated notes (which carry human feedback and
/// retry causes).
fn build_prompt(task: &Tick, context: &str) -> String {
    let mut prompt = String::new();
    if !context.is_empty() {
        prompt.push_str(context);
        prompt.push('\n');
    }
    prompt.push_str(&format!("Work on task {}: {}\n", task.id, task.title));
    if !task.description.is_empty() {
        prompt.push_str(&format!("\nDescription:\n{}\n", task.description));
    }
    if !task.acceptance_criteria.is_empty() {
        prompt.push_str(&format!(
            "\nAcceptance criteria:\n{}\n",
            task.acceptance_criteria
        ));
    }
    if !task.notes.is_empty() {
        prompt.push_str(&format!("\nNotes so far:\n{}\n", task.notes));
    }
    prompt.push_str(
        "\nWhen the task is fully done, report completion. If you need human \
         input, say what kind.\n",
    );
    prompt
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
