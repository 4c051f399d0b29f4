//! Shell-backed agent adapter: drives an external agent CLI (Claude or
//! compatible) as a subprocess, feeding the prompt on stdin and parsing
//! structured JSON event lines out of stdout.

use std::process::Stdio;

use tk_agent::invoker::{AgentError, AgentInvoker, AgentOutcome, AgentRequest, OutputSink};
use tk_agent::record::ToolInvocation;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable naming the agent command line.
pub const AGENT_CMD_ENV: &str = "TICKS_AGENT";

const DEFAULT_AGENT_CMD: &str = "claude -p";

// ---------------------------------------------------------------------------
// ShellAgent
// ---------------------------------------------------------------------------

/// Runs `$TICKS_AGENT` (default `claude -p`) once per invocation via
/// `sh -c`, in the engine's working directory.
///
/// Structured lines recognized on stdout:
/// - `{"event":"session","id":"...","model":"..."}`
/// - `{"event":"tool_call","name":"...","input":{...}}`
/// - `{"event":"usage","input_tokens":N,"output_tokens":N,"cost_usd":F}`
/// - `{"event":"task_complete"}`
/// - `{"event":"awaiting","kind":"input"}`
///
/// Everything else accumulates as plain output and streams to the sink.
pub struct ShellAgent {
    command: String,
}

impl ShellAgent {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn from_env() -> Self {
        let command = std::env::var(AGENT_CMD_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_CMD.to_string());
        Self::new(command)
    }
}

#[async_trait::async_trait]
impl AgentInvoker for ShellAgent {
    async fn invoke(
        &self,
        request: AgentRequest,
        on_output: Option<OutputSink>,
    ) -> Result<AgentOutcome, AgentError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Agent(format!("spawn failed: {e}")))?;

        // Feed the prompt and close stdin so the agent knows it has
        // everything.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| AgentError::Agent(format!("prompt write failed: {e}")))?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Agent("no stdout handle".to_string()))?;

        let collect = async {
            let mut outcome = AgentOutcome::default();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(sink) = &on_output {
                    let _ = sink.send(line.clone());
                }
                if apply_event_line(&mut outcome, &line) {
                    continue;
                }
                outcome.output.push_str(&line);
                outcome.output.push('\n');
            }

            let status = child
                .wait()
                .await
                .map_err(|e| AgentError::Agent(e.to_string()))?;
            if !status.success() && !outcome.task_complete {
                return Err(AgentError::Agent(format!(
                    "agent exited with {status}"
                )));
            }
            Ok(outcome)
        };

        match tokio::time::timeout(request.timeout, collect).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tick_id = %request.tick_id, "agent timed out; killing subprocess");
                Err(AgentError::Timeout)
            }
        }
    }

    fn name(&self) -> &str {
        "shell"
    }
}

/// Interpret one stdout line as a structured event. Returns `true` when
/// consumed.
fn apply_event_line(outcome: &mut AgentOutcome, line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return false;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return false;
    };
    let Some(event) = value.get("event").and_then(|v| v.as_str()) else {
        return false;
    };

    match event {
        "session" => {
            if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                outcome.session_id = id.to_string();
            }
            if let Some(model) = value.get("model").and_then(|v| v.as_str()) {
                outcome.model = model.to_string();
            }
        }
        "tool_call" => {
            outcome.tool_invocations.push(ToolInvocation {
                name: value
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                input: value.get("input").cloned(),
                at: chrono::Utc::now(),
            });
        }
        "usage" => {
            outcome.usage.input_tokens += value
                .get("input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            outcome.usage.output_tokens += value
                .get("output_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            outcome.usage.cost_usd += value
                .get("cost_usd")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            outcome.turns += 1;
        }
        "thinking" => {
            if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
                outcome.thinking.push_str(text);
                outcome.thinking.push('\n');
            }
        }
        "task_complete" => outcome.task_complete = true,
        "awaiting" => {
            match value
                .get("kind")
                .and_then(|v| v.as_str())
                .unwrap_or("input")
                .parse()
            {
                Ok(kind) => outcome.needs_human = Some(kind),
                Err(_) => debug!(line = trimmed, "unknown awaiting kind; ignored"),
            }
        }
        _ => return false,
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tk_core::types::Awaiting;

    fn request(prompt: &str) -> AgentRequest {
        AgentRequest {
            tick_id: "a1b".into(),
            prompt: prompt.into(),
            working_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn event_lines_populate_outcome() {
        let mut outcome = AgentOutcome::default();
        assert!(apply_event_line(
            &mut outcome,
            r#"{"event":"session","id":"s-1","model":"m-1"}"#
        ));
        assert!(apply_event_line(
            &mut outcome,
            r#"{"event":"usage","input_tokens":100,"output_tokens":40,"cost_usd":0.01}"#
        ));
        assert!(apply_event_line(
            &mut outcome,
            r#"{"event":"tool_call","name":"edit_file","input":{"path":"x.rs"}}"#
        ));
        assert!(apply_event_line(&mut outcome, r#"{"event":"task_complete"}"#));

        assert_eq!(outcome.session_id, "s-1");
        assert_eq!(outcome.model, "m-1");
        assert_eq!(outcome.usage.input_tokens, 100);
        assert_eq!(outcome.tool_invocations.len(), 1);
        assert_eq!(outcome.turns, 1);
        assert!(outcome.task_complete);
    }

    #[test]
    fn awaiting_event_maps_kind() {
        let mut outcome = AgentOutcome::default();
        assert!(apply_event_line(
            &mut outcome,
            r#"{"event":"awaiting","kind":"review"}"#
        ));
        assert_eq!(outcome.needs_human, Some(Awaiting::Review));
    }

    #[test]
    fn plain_lines_are_not_consumed() {
        let mut outcome = AgentOutcome::default();
        assert!(!apply_event_line(&mut outcome, "just some narration"));
        assert!(!apply_event_line(&mut outcome, r#"{"no_event": true}"#));
        assert!(!apply_event_line(&mut outcome, "{ broken json"));
    }

    #[tokio::test]
    async fn echo_agent_round_trip() {
        let agent = ShellAgent::new("cat; echo '{\"event\":\"task_complete\"}'");
        let outcome = agent.invoke(request("hello agent\n"), None).await.unwrap();
        assert!(outcome.output.contains("hello agent"));
        assert!(outcome.task_complete);
    }

    #[tokio::test]
    async fn output_streams_to_sink() {
        let (tx, rx) = flume::unbounded();
        let agent = ShellAgent::new("echo streaming-line");
        let _ = agent.invoke(request("x"), Some(tx)).await;
        let lines: Vec<String> = rx.drain().collect();
        assert!(lines.iter().any(|l| l.contains("streaming-line")));
    }

    #[tokio::test]
    async fn hung_agent_times_out() {
        let agent = ShellAgent::new("sleep 30");
        let mut req = request("x");
        req.timeout = Duration::from_millis(200);
        let result = agent.invoke(req, None).await;
        assert!(matches!(result, Err(AgentError::Timeout)));
    }

    #[tokio::test]
    async fn failing_agent_is_transient_error() {
        let agent = ShellAgent::new("exit 7");
        let result = agent.invoke(request("x"), None).await;
        match result {
            Err(e) => assert!(e.is_transient()),
            Ok(_) => panic!("expected an error"),
        }
    }
}
