//! The agent capability this system consumes. The engine never talks to an
//! LLM directly; it drives whatever implements [`AgentInvoker`]. Concrete
//! implementations (a Claude CLI wrapper, an API client) live in dependent
//! crates; this crate ships a [`StubAgent`] for placeholder wiring and
//! tests build scripted mocks on the trait.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tk_core::types::Awaiting;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent not configured: {0}")]
    NotConfigured(String),
    #[error("agent failed: {0}")]
    Agent(String),
    #[error("agent invocation timed out")]
    Timeout,
    #[error("agent invocation cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Transient errors are retried by the engine's task-retry policy;
    /// the rest abort the run.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Agent(_) | AgentError::Timeout)
    }
}

// ---------------------------------------------------------------------------
// Request / outcome types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// The tick the agent is working on (an epic id for scheduling-level
    /// prompts like file prediction).
    pub tick_id: String,
    pub prompt: String,
    /// Working directory for the agent process — the repo root, or the
    /// epic's worktree when isolation is on.
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One finished agent invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub output: String,
    pub thinking: String,
    pub tool_invocations: Vec<crate::record::ToolInvocation>,
    pub usage: Usage,
    pub session_id: String,
    pub model: String,
    pub turns: u32,
    /// The agent judged the current task done.
    pub task_complete: bool,
    /// The agent paused the task pending a specific kind of human action;
    /// the engine hands the tick to the approval workflow and moves on.
    pub needs_human: Option<Awaiting>,
}

/// Streaming stdout chunks, delivered as the agent produces them.
pub type OutputSink = flume::Sender<String>;

// ---------------------------------------------------------------------------
// AgentInvoker trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run the agent once. Implementations honor `request.timeout` and
    /// forward stdout chunks to `on_output` when provided.
    async fn invoke(
        &self,
        request: AgentRequest,
        on_output: Option<OutputSink>,
    ) -> Result<AgentOutcome, AgentError>;

    /// Human-readable implementation name (e.g. "claude-cli").
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// StubAgent — returns an error for every call.
// ---------------------------------------------------------------------------

/// A placeholder invoker that always reports `NotConfigured`.
#[derive(Debug, Clone)]
pub struct StubAgent {
    agent_name: String,
}

impl StubAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            agent_name: name.into(),
        }
    }
}

#[async_trait::async_trait]
impl AgentInvoker for StubAgent {
    async fn invoke(
        &self,
        _request: AgentRequest,
        _on_output: Option<OutputSink>,
    ) -> Result<AgentOutcome, AgentError> {
        Err(AgentError::NotConfigured(format!(
            "{} agent is not configured — install a concrete implementation",
            self.agent_name
        )))
    }

    fn name(&self) -> &str {
        &self.agent_name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_agent_is_not_configured() {
        let agent = StubAgent::new("stub");
        let result = agent
            .invoke(
                AgentRequest {
                    tick_id: "a1b".into(),
                    prompt: "do the thing".into(),
                    working_dir: ".".into(),
                    timeout: Duration::from_secs(1),
                },
                None,
            )
            .await;
        assert!(matches!(result, Err(AgentError::NotConfigured(_))));
        assert_eq!(agent.name(), "stub");
    }

    #[test]
    fn transient_classification() {
        assert!(AgentError::Timeout.is_transient());
        assert!(AgentError::Agent("flaked".into()).is_transient());
        assert!(!AgentError::Cancelled.is_transient());
        assert!(!AgentError::NotConfigured("x".into()).is_transient());
    }

    #[test]
    fn usage_totals() {
        let u = Usage {
            input_tokens: 100,
            output_tokens: 50,
            cost_usd: 0.01,
        };
        assert_eq!(u.total_tokens(), 150);
    }
}
