//! Extraction invoker.
//!
//! Runs the external model-extraction program as a subprocess. The program
//! has no structured progress protocol, so progress is synthetic: 0 before
//! launch, 50 once the process is running, 100 after a clean exit.
//!
//! Each launch is an [`ExtractionTask`] moving through
//! `Pending -> Running -> Succeeded | Failed`. Tasks are bounded by a timeout
//! covering both the exit and the draining of its output, and can be
//! cancelled. On unix the child leads its own process group, and the whole
//! group is killed on timeout or cancellation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use utoipa::ToSchema;

/// Synthetic progress reported once the child process has been spawned.
const SPAWNED_PERCENT: u8 = 50;

/// Environment variable telling the extraction program where to write output.
pub const OUTPUT_DIR_ENV: &str = "EXTRACTION_OUTPUT_DIR";

/// Callback receiving synthetic extraction progress (0–100).
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Extraction exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("Extraction terminated by a signal: {stderr}")]
    Terminated { stderr: String },
    #[error("Extraction timed out after {secs}s")]
    TimedOut { secs: u64 },
    #[error("Extraction was cancelled")]
    Cancelled,
    #[error("Extraction task panicked: {0}")]
    Panicked(String),
    #[error("IO error while waiting for extraction: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle of one extraction subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Captured output of a successful extraction.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub stdout: String,
    pub elapsed: Duration,
}

/// Produces extraction output for a coordinate.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        latitude: Decimal,
        longitude: Decimal,
        on_progress: ProgressSink,
    ) -> Result<(), ExtractionError>;
}

/// Launches the extraction program as `<interpreter> <script> <args...>`.
#[derive(Debug, Clone)]
pub struct ExtractionInvoker {
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
    output_dir: Option<PathBuf>,
}

impl ExtractionInvoker {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout,
            output_dir: None,
        }
    }

    /// Directory passed to the child via [`OUTPUT_DIR_ENV`].
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Launch the subprocess in the background.
    pub fn spawn(&self, args: Vec<String>, on_progress: ProgressSink) -> ExtractionTask {
        let (state, _) = watch::channel(TaskState::Pending);
        let state = Arc::new(state);
        let invoker = self.clone();
        let task_state = state.clone();
        let handle = tokio::spawn(async move {
            let result = invoker.execute(&args, &task_state, &on_progress).await;
            task_state.send_replace(if result.is_ok() {
                TaskState::Succeeded
            } else {
                TaskState::Failed
            });
            result
        });
        ExtractionTask { state, handle }
    }

    /// Launch the subprocess and wait for it to settle.
    pub async fn run(
        &self,
        args: Vec<String>,
        on_progress: ProgressSink,
    ) -> Result<ExtractionOutput, ExtractionError> {
        self.spawn(args, on_progress).wait().await
    }

    async fn execute(
        &self,
        args: &[String],
        state: &watch::Sender<TaskState>,
        on_progress: &ProgressSink,
    ) -> Result<ExtractionOutput, ExtractionError> {
        on_progress(0);
        let started = Instant::now();

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.output_dir {
            cmd.env(OUTPUT_DIR_ENV, dir);
        }

        tracing::info!(
            "Launching extraction: {} {} {}",
            self.interpreter,
            self.script.display(),
            args.join(" ")
        );
        let mut child = cmd.spawn().map_err(|source| ExtractionError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;
        let mut group = ProcessGroup::new(child.id());
        state.send_replace(TaskState::Running);
        on_progress(SPAWNED_PERCENT);

        let stdout_pump = tokio::spawn(pump_lines(child.stdout.take(), "stdout"));
        let stderr_pump = tokio::spawn(pump_lines(child.stderr.take(), "stderr"));

        // Descendants holding the pipes keep the pumps open after the child exits.
        let settled = tokio::time::timeout(self.timeout, async {
            let status = child.wait().await?;
            let stdout = stdout_pump.await.unwrap_or_default();
            let stderr = stderr_pump.await.unwrap_or_default();
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;
        let (status, stdout, stderr) = match settled {
            Ok(settled) => {
                group.release();
                settled?
            }
            Err(_) => {
                tracing::error!(
                    "Extraction exceeded {}s, killing process group",
                    self.timeout.as_secs()
                );
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::debug!("Extraction process already gone: {}", e);
                }
                return Err(ExtractionError::TimedOut {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        match status.code() {
            Some(0) => {
                on_progress(100);
                Ok(ExtractionOutput {
                    stdout,
                    elapsed: started.elapsed(),
                })
            }
            Some(code) => Err(ExtractionError::Failed { code, stderr }),
            None => Err(ExtractionError::Terminated { stderr }),
        }
    }
}

#[async_trait]
impl Extractor for ExtractionInvoker {
    async fn extract(
        &self,
        latitude: Decimal,
        longitude: Decimal,
        on_progress: ProgressSink,
    ) -> Result<(), ExtractionError> {
        let output = self
            .run(vec![latitude.to_string(), longitude.to_string()], on_progress)
            .await?;
        tracing::info!(
            "Extraction for ({}, {}) finished in {:.1}s with {} lines of output",
            latitude,
            longitude,
            output.elapsed.as_secs_f64(),
            output.stdout.lines().count()
        );
        Ok(())
    }
}

/// Handle to a running extraction subprocess.
pub struct ExtractionTask {
    state: Arc<watch::Sender<TaskState>>,
    handle: JoinHandle<Result<ExtractionOutput, ExtractionError>>,
}

impl ExtractionTask {
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Abort the task; the child process is killed on drop.
    pub fn cancel(&self) {
        self.handle.abort();
        self.state.send_replace(TaskState::Failed);
    }

    /// Wait for the task to settle. Dropping this future cancels the task.
    pub async fn wait(self) -> Result<ExtractionOutput, ExtractionError> {
        let _guard = AbortOnDrop(self.handle.abort_handle());
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                self.state.send_replace(TaskState::Failed);
                Err(ExtractionError::Cancelled)
            }
            Err(e) => {
                self.state.send_replace(TaskState::Failed);
                Err(ExtractionError::Panicked(e.to_string()))
            }
        }
    }
}

/// The child's process group. Killed on drop unless released.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self(pid)
    }

    /// The group has settled; nothing left to kill.
    fn release(&mut self) {
        self.0 = None;
    }

    fn kill(&mut self) {
        let Some(pid) = self.0.take() else {
            return;
        };
        #[cfg(unix)]
        {
            let killed = std::process::Command::new("kill")
                .arg("-9")
                .arg(format!("-{pid}"))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = killed {
                tracing::warn!("Failed to kill extraction process group {}: {}", pid, e);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Forward a child stream to the log line by line, returning the captured text.
async fn pump_lines<R>(reader: Option<R>, stream: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(reader) = reader else {
        return captured;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if stream == "stderr" {
                    tracing::warn!(stream, "{}", line);
                } else {
                    tracing::info!(stream, "{}", line);
                }
                captured.push_str(&line);
                captured.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(stream, "Failed to read extraction output: {}", e);
                break;
            }
        }
    }
    captured
}
