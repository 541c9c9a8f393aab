//! Sandboxed-ish execution of model-authored Python.
//!
//! Code is statically validated, written to a temp file behind a small
//! preamble (UTF-8 stdio plus an `input()` shim that turns interactive
//! prompts into a line protocol on stdout), then run as a child process
//! in the workspace directory. Interactive input requests route through
//! the confirmation gate so the human supplies the line.

use crate::agent::ControlFlags;
use crate::error::{CoworkError, Result};
use crate::events::{AgentEvent, EventSender};
use crate::gate::{ConfirmationGate, Decision};
use crate::security::{validate_code_strict, SecurityPolicy};
use regex::Regex;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

const INPUT_SENTINEL: &str = "__REQUEST_INPUT__:";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Injected ahead of user code. The input shim prints a sentinel line and
/// blocks on stdin, so the parent can relay a human-provided answer.
const PREAMBLE: &str = r#"import sys as _sys, builtins as _builtins
try:
    _sys.stdout.reconfigure(encoding="utf-8", errors="replace")
    _sys.stderr.reconfigure(encoding="utf-8", errors="replace")
except AttributeError:
    pass
def _relay_input(prompt=""):
    print("__REQUEST_INPUT__:" + str(prompt), flush=True)
    return _sys.stdin.readline().rstrip("\n")
_builtins.input = _relay_input
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub killed: bool,
}

pub struct CodeExecutor {
    policy: SecurityPolicy,
    python: String,
    workspace: PathBuf,
}

impl CodeExecutor {
    pub fn new(policy: SecurityPolicy, workspace: impl Into<PathBuf>) -> Self {
        let python =
            std::env::var("COWORK_PYTHON").unwrap_or_else(|_| "python3".to_string());
        CodeExecutor {
            policy,
            python,
            workspace: workspace.into(),
        }
    }

    /// Validate and run one block of Python. Output lines stream out as
    /// `ExecOutput` events; the full transcript also comes back in the
    /// report.
    pub async fn run(
        &self,
        code: &str,
        events: &EventSender,
        gate: &ConfirmationGate,
        flags: &ControlFlags,
    ) -> Result<ExecutionReport> {
        validate_code_strict(code, &self.policy)?;

        // The temp file is deleted on drop, on every exit path.
        let mut script = tempfile::Builder::new()
            .prefix("cowork_exec_")
            .suffix(".py")
            .tempfile()?;
        script.write_all(PREAMBLE.as_bytes())?;
        script.write_all(code.as_bytes())?;
        script.flush()?;

        let mut child = Command::new(&self.python)
            .arg(script.path())
            .current_dir(&self.workspace)
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CoworkError::ToolError(format!("Failed to launch {}: {}", self.python, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoworkError::ToolError("Child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoworkError::ToolError("Child stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CoworkError::ToolError("Child stderr unavailable".to_string()))?;

        // Drained concurrently: a child flooding stderr past the pipe
        // buffer must not stall the stdout pump.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut collected_stdout = String::new();
        let mut killed = false;

        loop {
            if flags.is_stopped() {
                child.start_kill().ok();
                killed = true;
                break;
            }

            let line = match timeout(POLL_INTERVAL, lines.next_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    child.start_kill().ok();
                    killed = true;
                    let _ = events.send(AgentEvent::ExecOutput(format!(
                        "[output read error: {}]",
                        e
                    )));
                    break;
                }
                Err(_) => continue,
            };

            if let Some(prompt) = line.strip_prefix(INPUT_SENTINEL) {
                let answer = self.relay_input(prompt, events, gate).await;
                stdin.write_all(answer.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await?;
                continue;
            }

            collected_stdout.push_str(&line);
            collected_stdout.push('\n');
            let _ = events.send(AgentEvent::ExecOutput(line));
        }

        // After exit (or a kill) the pipe closes and the drain finishes.
        let collected_stderr = stderr_task.await.unwrap_or_default();
        if !collected_stderr.trim().is_empty() {
            for line in collected_stderr.lines() {
                let _ = events.send(AgentEvent::ExecOutput(line.to_string()));
            }
        }

        let status = child.wait().await?;

        Ok(ExecutionReport {
            exit_code: status.code(),
            stdout: collected_stdout,
            stderr: collected_stderr,
            killed,
        })
    }

    /// Ask the human for the input line the script is blocked on.
    async fn relay_input(
        &self,
        prompt: &str,
        events: &EventSender,
        gate: &ConfirmationGate,
    ) -> String {
        let rx = match gate.request() {
            Ok(rx) => rx,
            Err(_) => return String::new(),
        };
        let _ = events.send(AgentEvent::InputRequested(prompt.to_string()));
        match rx.await.unwrap_or(Decision::Denied) {
            Decision::Reply(text) => text,
            Decision::Approved => "y".to_string(),
            Decision::Denied => String::new(),
        }
    }
}

/// Pull the first fenced Python block out of model output.
pub fn extract_python_block(text: &str) -> Option<String> {
    // Compiled per call; extraction happens at most once per turn.
    let fence = Regex::new(r"(?s)```(?:python|py)\r?\n(.*?)```").ok()?;
    fence
        .captures(text)
        .map(|caps| caps[1].trim_end().to_string() + "\n")
}
