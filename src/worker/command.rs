use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info};

use super::{TaskSpec, Worker, WorkerOutput};
use crate::errors::WorkerError;
use crate::util::extract_json_object;

/// Longest stderr excerpt carried in a `NonZeroExit` error.
const STDERR_EXCERPT: usize = 2000;

/// Runs an external command once per request.
///
/// The `TaskSpec` is written to the child's stdin as JSON; the child answers
/// with a `WorkerOutput` JSON object on stdout. Surrounding log noise on
/// stdout is tolerated as long as it contains one outermost object.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    // Environment passed to every child in addition to the inherited one
}

impl CommandWorker {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn decode(stdout: &str) -> Result<WorkerOutput, WorkerError> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(WorkerOutput::default());
        }
        if let Ok(output) = serde_json::from_str(trimmed) {
            return Ok(output);
        }
        let json = extract_json_object(trimmed).ok_or_else(|| WorkerError::InvalidOutput {
            message: "no JSON object on stdout".to_string(),
        })?;
        serde_json::from_str(&json).map_err(|e| WorkerError::InvalidOutput {
            message: e.to_string(),
        })
    }

    async fn run(&self, task: &TaskSpec) -> Result<WorkerOutput, WorkerError> {
        let payload = serde_json::to_vec(task).map_err(|e| WorkerError::InvalidOutput {
            message: format!("failed to encode task: {}", e),
        })?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&task.working_dir)
            .env("ANVIL_TASK_KIND", task.kind.to_string())
            .env("ANVIL_ATTEMPT", task.attempt.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(id) = task.component_id() {
            cmd.env("ANVIL_COMPONENT", id);
        }

        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        // A child that exits without reading stdin is not an error by itself
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {
                    let _ = stdin.shutdown().await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(WorkerError::Io(e)),
            }
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Unavailable("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::Unavailable("stderr not captured".to_string()))?;

        let mut out = String::new();
        let mut err = String::new();
        let (out_read, err_read, status) = tokio::join!(
            stdout.read_to_string(&mut out),
            stderr.read_to_string(&mut err),
            child.wait()
        );
        out_read?;
        err_read?;
        let status = status?;

        if !status.success() {
            let mut stderr = err.trim().to_string();
            if stderr.len() > STDERR_EXCERPT {
                let cut = (0..=STDERR_EXCERPT)
                    .rev()
                    .find(|i| stderr.is_char_boundary(*i))
                    .unwrap_or(0);
                stderr.truncate(cut);
            }
            return Err(WorkerError::NonZeroExit {
                code: status.code(),
                stderr,
            });
        }

        Self::decode(&out)
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn invoke(&self, task: TaskSpec) -> Result<WorkerOutput, WorkerError> {
        let start = Instant::now();
        debug!(
            command = %self.command,
            kind = %task.kind,
            component = task.component_id().unwrap_or("-"),
            attempt = task.attempt,
            "invoking worker"
        );

        // Dropping the future on timeout kills the child
        let result = match tokio::time::timeout(self.timeout, self.run(&task)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(self.timeout)),
        };

        info!(
            kind = %task.kind,
            component = task.component_id().unwrap_or("-"),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "worker finished"
        );
        result
    }
}

/// Resolve a worker command relative to the project when it names a local file.
pub fn resolve_command(project_dir: &std::path::Path, command: &str) -> String {
    let candidate = PathBuf::from(command);
    if candidate.is_relative() && command.contains('/') {
        let local = project_dir.join(&candidate);
        if local.exists() {
            return local.to_string_lossy().into_owned();
        }
    }
    command.to_string()
}
