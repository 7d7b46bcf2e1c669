//! Backend execution contract and the command-line executor

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tierline_core::{AssembledContext, BackendSpec, HandlerSpec, Request};
use tierline_telemetry::truncate_chars;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Output of one successful backend call
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub payload: Vec<u8>,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// The backend could not be reached at all
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The backend ran and reported failure
    #[error("failed: {0}")]
    Failed(String),
}

/// One execution backend (or fast-path handler).
///
/// Implementations must be `Send + Sync`; the router holds them as
/// `Arc<dyn BackendExecutor>` and calls them from spawned tasks. The router
/// enforces `timeout` itself by dropping the future, so executors only need
/// to treat it as a deadline hint.
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &Request,
        context: &AssembledContext,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError>;

    /// Cheap liveness check used to bring an unhealthy backend back. The
    /// router bounds it by `timeout` the same way as `execute`.
    async fn probe(&self, _timeout: Duration) -> Result<(), ExecutionError> {
        Ok(())
    }
}

/// Runs a local command per request. The rendered context and the request
/// text are written to stdin; stdout is the payload.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: String,
    args: Vec<String>,
    cost_per_call: f64,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>, cost_per_call: f64) -> Self {
        Self {
            command: command.into(),
            args,
            cost_per_call,
        }
    }

    /// `None` when the backend has no command configured
    pub fn from_backend(spec: &BackendSpec) -> Option<Self> {
        spec.command
            .as_ref()
            .map(|command| Self::new(command.clone(), spec.args.clone(), spec.cost_per_call))
    }

    pub fn from_handler(spec: &HandlerSpec) -> Self {
        Self::new(spec.command.clone(), spec.args.clone(), 0.0)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, input: &[u8], timeout: Duration) -> Result<Vec<u8>, ExecutionError> {
        let mut cmd = self.command();
        cmd.env("TIERLINE_TIMEOUT_MS", timeout.as_millis().to_string());

        let mut child = cmd.spawn().map_err(|e| {
            ExecutionError::Unavailable(format!("failed to spawn {}: {e}", self.command))
        })?;

        // Feed stdin while draining stdout so a child that echoes as it
        // reads never blocks on a full pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A command that exits without reading its input is not an error.
                if let Err(e) = stdin.write_all(input).await {
                    tracing::debug!(command = %self.command, error = %e, "stdin closed early");
                }
                // Dropped here so the child sees EOF
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output
            .map_err(|e| ExecutionError::Failed(format!("failed to wait for {}: {e}", self.command)))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ExecutionError::Failed(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                truncate_chars(stderr.trim(), 200)
            )))
        }
    }
}

#[async_trait]
impl BackendExecutor for CommandExecutor {
    async fn execute(
        &self,
        request: &Request,
        context: &AssembledContext,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut input = context.render();
        if !input.is_empty() {
            input.push_str("\n\n");
        }
        input.push_str(&request.text);

        let payload = self.run(input.as_bytes(), timeout).await?;
        Ok(ExecutionResult {
            payload,
            cost: self.cost_per_call,
        })
    }

    async fn probe(&self, timeout: Duration) -> Result<(), ExecutionError> {
        self.run(b"", timeout).await.map(|_| ())
    }
}
