// src/sys/exec.rs

use std::fs::File;
use std::io::{self, PipeWriter};
use std::os::fd::OwnedFd;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::format_duration;
use crate::sys::command::{Command, Dialect, VARIABLE_PREFIX};
use crate::sys::traits::{CommandExecutor, ExecutionResult, LogSink};

/// The scripting interpreter a command is handed to as its single command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
    pub dialect: Dialect,
}

impl Interpreter {
    /// `<program> -NoProfile -NonInteractive -Command <text>`
    pub fn powershell(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
            ],
            dialect: Dialect::PowerShell,
        }
    }

    /// `sh -c <text>`
    pub fn posix() -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
            dialect: Dialect::Posix,
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::powershell("pwsh")
    }
}

// ==============================================================================
// 1. Log Sinks
// ==============================================================================

/// Forwards script output to the tracing subscriber.
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn line(&self, line: &str) {
        info!(target: "sign_relay::script", "{}", line);
    }
}

// Channel-backed sink, the same way build output is streamed back to callers.
impl LogSink for mpsc::UnboundedSender<String> {
    fn line(&self, line: &str) {
        let _ = self.send(line.to_string());
    }
}

// ==============================================================================
// 2. Interpreter Executor
// ==============================================================================

pub struct InterpreterExecutor {
    interpreter: Interpreter,
}

impl InterpreterExecutor {
    pub fn new(interpreter: Interpreter) -> Self {
        Self { interpreter }
    }

    fn spawn(&self, command: &Command, writer: PipeWriter) -> io::Result<Child> {
        let stderr = writer.try_clone()?;

        let mut process = tokio::process::Command::new(&self.interpreter.program);
        process
            .args(&self.interpreter.args)
            .arg(command.text())
            .stdin(Stdio::null())
            // 🛡️ One pipe for both streams keeps the child's write order intact.
            .stdout(writer)
            .stderr(stderr)
            .kill_on_drop(true);

        // Nothing from our own namespace is inherited; only this command's bindings.
        for (key, _) in std::env::vars_os() {
            if key.to_string_lossy().starts_with(VARIABLE_PREFIX) {
                process.env_remove(&key);
            }
        }
        process.envs(command.expose_environment());

        // `process` is dropped on return, closing the parent's copies of the write end.
        process.spawn()
    }
}

/// Reads the merged stream line by line until every writer has closed it.
async fn drain(
    receiver: pipe::Receiver,
    sink: &dyn LogSink,
    captured: &mut String,
) -> io::Result<()> {
    let mut reader = BufReader::new(receiver);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buffer);
        sink.line(line.trim_end_matches(['\n', '\r']));
        captured.push_str(&line);
    }
}

#[async_trait]
impl CommandExecutor for InterpreterExecutor {
    fn dialect(&self) -> Dialect {
        self.interpreter.dialect
    }

    async fn execute(
        &self,
        command: Command,
        timeout: Duration,
        sink: &dyn LogSink,
    ) -> ExecutionResult {
        let program = self.interpreter.program.as_str();
        debug!(
            program,
            text = command.text(),
            variables = ?command.variables().keys().collect::<Vec<_>>(),
            "starting script"
        );

        let (reader, writer) = match io::pipe() {
            Ok(ends) => ends,
            Err(e) => return ExecutionResult::error(format!("Failed to create output pipe: {e}")),
        };

        let mut child = match self.spawn(&command, writer) {
            Ok(child) => child,
            Err(e) => return ExecutionResult::error(format!("Failed to start {program}: {e}")),
        };
        // The decoded environment is no longer needed once the child has it.
        drop(command);

        let receiver = match pipe::Receiver::from_file(File::from(OwnedFd::from(reader))) {
            Ok(receiver) => receiver,
            Err(e) => {
                let _ = child.kill().await;
                return ExecutionResult::error(format!("Failed to read output of {program}: {e}"));
            }
        };

        let mut captured = String::new();
        let outcome = tokio::time::timeout(timeout, async {
            let (status, drained) =
                tokio::join!(child.wait(), drain(receiver, sink, &mut captured));
            drained.and(status)
        })
        .await;

        match outcome {
            Err(_) => {
                warn!(program, timeout = ?timeout, "script timed out, terminating");
                if let Err(e) = child.kill().await {
                    warn!(program, error = %e, "failed to terminate script");
                }
                ExecutionResult::error(format!(
                    "{program} did not complete within {}",
                    format_duration(timeout)
                ))
            }
            Ok(Err(e)) => ExecutionResult::error(format!("Failed while running {program}: {e}")),
            Ok(Ok(status)) if status.success() => {
                debug!(program, bytes = captured.len(), "script completed");
                ExecutionResult::Success { output: captured }
            }
            Ok(Ok(status)) => {
                let code = status.code().unwrap_or(-1);
                warn!(program, code, "script failed");
                ExecutionResult::error(format!(
                    "{program} did not complete successfully (exit code {code})"
                ))
            }
        }
    }
}
