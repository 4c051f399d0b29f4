use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use tk_core::config::VerificationConfig;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("verification command failed to start: {0}")]
    Spawn(String),
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// VerifyReport / Verifier trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub passed: bool,
    /// Trailing output of the verification run, for notes and run records.
    pub summary: String,
}

/// External verification capability consulted after a task completes.
#[async_trait::async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, tick_id: &str, working_dir: &Path)
        -> Result<VerifyReport, VerifyError>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// ShellVerifier
// ---------------------------------------------------------------------------

/// Runs the configured shell command (`config.verification.command`) in the
/// working directory; exit status decides pass/fail.
pub struct ShellVerifier {
    command: String,
    timeout: Duration,
}

impl ShellVerifier {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait::async_trait]
impl Verifier for ShellVerifier {
    async fn verify(
        &self,
        tick_id: &str,
        working_dir: &Path,
    ) -> Result<VerifyReport, VerifyError> {
        info!(tick_id, command = %self.command, "running verification");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(working_dir)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(VerifyError::Spawn(e.to_string())),
            Err(_) => {
                warn!(tick_id, "verification timed out");
                return Err(VerifyError::Timeout(self.timeout));
            }
        };

        let passed = output.status.success();
        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let summary = tail(&combined, 2000);

        if !passed {
            warn!(tick_id, "verification failed");
        }
        Ok(VerifyReport { passed, summary })
    }

    fn name(&self) -> &str {
        "shell"
    }
}

/// Last `max` bytes of `text`, aligned to a char boundary.
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
