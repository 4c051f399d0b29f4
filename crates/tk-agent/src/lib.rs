//! Agent capability seam and its persistence: the [`AgentInvoker`] trait
//! the run engine drives, run records with live snapshots, checkpoints,
//! and budget accounting.
//!
//! [`AgentInvoker`]: invoker::AgentInvoker

pub mod budget;
pub mod checkpoint;
pub mod invoker;
pub mod record;

pub use budget::{BudgetState, BudgetTracker};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use invoker::{AgentError, AgentInvoker, AgentOutcome, AgentRequest, OutputSink, StubAgent, Usage};
pub use record::{RecordStore, RunMetrics, RunRecord, ToolInvocation};
