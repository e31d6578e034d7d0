//! Sandboxed Script Execution
//!
//! Isolated execution context for dynamic analysis:
//! - Hard wall-clock timeout, process killed on expiry
//! - Sanitized environment (cleared, minimal PATH, HOME inside scratch)
//! - Private scratch directory, removed on every exit path
//! - Bounded output capture
//!
//! Each run gets its own sandbox instance; nothing is shared between
//! concurrent runs. `kill_on_drop` guarantees the child is reclaimed even
//! when the owning future is cancelled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Terminal and intermediate states of one sandbox run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Queued,
    Provisioned,
    Running,
    Completed,
    TimedOut,
    Crashed,
    Denied,
}

impl SandboxState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SandboxState::Completed
                | SandboxState::TimedOut
                | SandboxState::Crashed
                | SandboxState::Denied
        )
    }
}

/// Sandbox resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Maximum wall-clock execution time
    pub timeout: Duration,
    /// Maximum captured output size in bytes
    pub max_output_bytes: usize,
    /// Virtual memory ceiling in MB, enforced via ulimit
    pub max_memory_mb: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024, // 1 MB
            max_memory_mb: Some(256),
        }
    }
}

/// Everything observed during one sandbox run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub state: SandboxState,
    /// Exit code (None when killed by signal or timeout)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
    pub duration: Duration,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox provisioning denied: {0}")]
    Provision(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("failed to spawn sandboxed process: {0}")]
    Spawn(String),
}

/// Capability interface for dynamic execution. One call runs one code
/// block to a terminal state; implementations must support concurrent
/// independent runs.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(&self, language: &str, code: &str) -> Result<ExecutionTrace, SandboxError>;
}

/// Process-level sandbox backed by a scratch directory and a cleared
/// environment. Not a security boundary against a determined kernel
/// exploit; it bounds time, output, and ambient state.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn interpreter(language: &str) -> Result<(&'static str, &'static str), SandboxError> {
        match language {
            "python" | "python3" => Ok(("python3", "entry.py")),
            "bash" | "sh" | "shell" => Ok(("sh", "entry.sh")),
            other => Err(SandboxError::UnsupportedLanguage(other.to_string())),
        }
    }

    async fn provision(&self) -> Result<PathBuf, SandboxError> {
        let scratch = std::env::temp_dir().join(format!("skillgate-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| SandboxError::Provision(e.to_string()))?;
        Ok(scratch)
    }
}

#[async_trait]
impl SandboxRunner for ProcessSandbox {
    async fn run(&self, language: &str, code: &str) -> Result<ExecutionTrace, SandboxError> {
        let (interpreter, entry_name) = Self::interpreter(language)?;
        let scratch = self.provision().await?;
        debug!(%language, scratch = %scratch.display(), "sandbox provisioned");

        let result = self.execute(interpreter, entry_name, code, &scratch).await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(scratch = %scratch.display(), error = %e, "failed to remove scratch directory");
        }

        result
    }
}

impl ProcessSandbox {
    async fn execute(
        &self,
        interpreter: &str,
        entry_name: &str,
        code: &str,
        scratch: &PathBuf,
    ) -> Result<ExecutionTrace, SandboxError> {
        let start = std::time::Instant::now();

        let entry = scratch.join(entry_name);
        tokio::fs::write(&entry, code)
            .await
            .map_err(|e| SandboxError::Provision(e.to_string()))?;

        // Launch through sh so the memory ceiling applies before exec.
        let mut cmd = Command::new("sh");
        match self.config.max_memory_mb {
            Some(mb) => cmd.arg("-c").arg(format!(
                "ulimit -v {} 2>/dev/null; exec {} \"$1\"",
                mb * 1024,
                interpreter
            )),
            None => cmd.arg("-c").arg(format!("exec {} \"$1\"", interpreter)),
        };
        cmd.arg("sandbox")
            .arg(&entry)
            .current_dir(scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("HOME", scratch)
            .env("TMPDIR", scratch)
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SandboxError::Spawn(e.to_string()))?;

        let max_size = self.config.max_output_bytes;
        let outcome = tokio::time::timeout(self.config.timeout, async {
            let mut stdout = child.stdout.take();
            let mut stderr = child.stderr.take();

            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let mut truncated = false;

            // Both pipes are drained to EOF concurrently; a child that
            // writes heavily to either stream never blocks on a full pipe.
            let (out_truncated, err_truncated) = tokio::join!(
                async {
                    match stdout.as_mut() {
                        Some(stream) => read_bounded(stream, &mut stdout_buf, max_size).await,
                        None => false,
                    }
                },
                async {
                    match stderr.as_mut() {
                        Some(stream) => read_bounded(stream, &mut stderr_buf, max_size / 4).await,
                        None => false,
                    }
                }
            );
            truncated |= out_truncated | err_truncated;

            let status = child.wait().await;
            (stdout_buf, stderr_buf, status, truncated)
        })
        .await;

        match outcome {
            Ok((stdout_buf, stderr_buf, Ok(status), truncated)) => {
                // A None exit code means the process died to a signal.
                let state = if status.code().is_some() {
                    SandboxState::Completed
                } else {
                    SandboxState::Crashed
                };
                Ok(ExecutionTrace {
                    state,
                    exit_code: status.code(),
                    stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                    truncated,
                    duration: start.elapsed(),
                })
            }
            Ok((stdout_buf, stderr_buf, Err(e), truncated)) => {
                warn!(error = %e, "sandboxed process wait failed");
                Ok(ExecutionTrace {
                    state: SandboxState::Crashed,
                    exit_code: None,
                    stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                    truncated,
                    duration: start.elapsed(),
                })
            }
            Err(_) => {
                let _ = child.kill().await;
                warn!(timeout = ?self.config.timeout, "sandboxed process timed out");
                Ok(ExecutionTrace {
                    state: SandboxState::TimedOut,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("execution timed out after {:?}", self.config.timeout),
                    truncated: false,
                    duration: start.elapsed(),
                })
            }
        }
    }
}

/// Read a stream to EOF, keeping at most `max` bytes in `buf`. Returns
/// true when the stream had more data than fit. Reading always continues
/// to EOF: stopping at the cap would leave the child blocked on a full
/// pipe and misreport it as timed out.
async fn read_bounded<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> bool {
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => return truncated,
            Ok(n) => {
                let room = max.saturating_sub(buf.len());
                if room >= n {
                    buf.extend_from_slice(&chunk[..n]);
                } else {
                    buf.extend_from_slice(&chunk[..room]);
                    truncated = true;
                }
            }
            Err(_) => return truncated,
        }
    }
}
