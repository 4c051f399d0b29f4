//! The agent run engine: drives an [`AgentInvoker`] over an epic's tasks
//! with budget tracking, checkpointing, verification, retries, worktree
//! isolation, graceful cancellation, and watch-mode restart. Also home to
//! the dependency predictor that inserts blockers ahead of parallel
//! scheduling.
//!
//! [`AgentInvoker`]: tk_agent::AgentInvoker

pub mod cancel;
pub mod predictor;
pub mod runner;
pub mod verify;

pub use cancel::CancelToken;
pub use predictor::{predict_and_link, PredictedConflict};
pub use runner::{EngineError, RunEngine, RunOptions, RunOutcome, Signal};
pub use verify::{ShellVerifier, Verifier, VerifyError, VerifyReport};
