mod container_runner;
mod process_runner;
mod workspace;

pub use container_runner::ContainerRunner;
pub use process_runner::ProcessRunner;
pub use workspace::Workspace;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::config::{ByteSize, SandboxBackend, SandboxConfig};
use crate::language::IsolationProfile;

/// Upper bound on captured stdout and stderr, each
pub const MAX_OUTPUT_BYTES: u64 = 8 * 1024 * 1024;

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One command to run inside an isolated workspace
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub workdir: PathBuf,
    pub argv: Vec<String>,
    pub stdin: String,
    pub time_limit: Duration,
    pub memory_limit: ByteSize,
    pub profile: IsolationProfile,
    pub remediation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Success,
    RuntimeError,
    Timeout,
    EnvironmentError,
}

#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub status: SandboxStatus,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    /// Peak resident memory, best effort
    pub memory_bytes: u64,
}

impl SandboxOutcome {
    pub fn environment_error(message: impl Into<String>) -> Self {
        Self {
            status: SandboxStatus::EnvironmentError,
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: message.into(),
            elapsed: Duration::ZERO,
            memory_bytes: 0,
        }
    }

    /// Partial output of a killed program is discarded
    pub fn timed_out(limit: Duration, elapsed: Duration, memory_bytes: u64) -> Self {
        Self {
            status: SandboxStatus::Timeout,
            exit_code: None,
            signal: Some(libc::SIGKILL),
            stdout: String::new(),
            stderr: format!("Time limit of {} ms exceeded", limit.as_millis()),
            elapsed,
            memory_bytes,
        }
    }

    /// Builds an outcome for a process that ran to completion and classifies it
    pub fn finished(
        exit_code: Option<i32>,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
        elapsed: Duration,
        memory_bytes: u64,
    ) -> Self {
        let status = classify(exit_code, signal, &stdout, &stderr);
        Self {
            status,
            exit_code,
            signal,
            stdout,
            stderr,
            elapsed,
            memory_bytes,
        }
    }
}

/// A non-zero exit only counts as a runtime error when the program printed
/// nothing to stdout and something to stderr. A fatal signal always does.
pub fn classify(
    exit_code: Option<i32>,
    signal: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> SandboxStatus {
    if signal.is_some() {
        return SandboxStatus::RuntimeError;
    }
    match exit_code {
        Some(0) => SandboxStatus::Success,
        Some(_) if stdout.is_empty() && !stderr.trim().is_empty() => SandboxStatus::RuntimeError,
        Some(_) => SandboxStatus::Success,
        None => SandboxStatus::RuntimeError,
    }
}

/// Backend able to run one command under resource limits
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Creates a new executor instance for the worker with the given ID
    fn build(id: usize, config: &SandboxConfig) -> Result<Self>
    where
        Self: Sized;

    fn name(&self) -> &'static str;

    /// Never fails: infrastructure problems come back as `EnvironmentError`
    async fn execute(&self, request: SandboxRequest) -> SandboxOutcome;
}

/// Creates the executor selected by the configuration
pub fn create_sandbox_executor(
    id: usize,
    config: &SandboxConfig,
) -> Result<Box<dyn SandboxExecutor>> {
    match config.backend {
        SandboxBackend::Process => {
            log::info!("Creating ProcessRunner {id}");
            Ok(Box::new(ProcessRunner::build(id, config)?))
        }
        SandboxBackend::Container => {
            log::info!("Creating ContainerRunner {id}");
            Ok(Box::new(ContainerRunner::build(id, config)?))
        }
    }
}

/// Lossy UTF-8 conversion of captured output
pub(crate) fn decode_output(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Reads everything, keeping at most `MAX_OUTPUT_BYTES` so the writer never blocks
pub(crate) async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = MAX_OUTPUT_BYTES as usize - buf.len();
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok(buf)
}

pub(crate) async fn collect_output(task: Option<JoinHandle<io::Result<Vec<u8>>>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await {
        Ok(Ok(Ok(bytes))) => decode_output(bytes),
        Ok(Ok(Err(e))) => {
            log::warn!("Failed to read process output: {e}");
            String::new()
        }
        Ok(Err(e)) => {
            log::warn!("Output reader task failed: {e}");
            String::new()
        }
        Err(_) => {
            abort.abort();
            log::warn!("Timed out draining process output");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_exit_codes() {
        assert_eq!(classify(Some(0), None, "", "warning"), SandboxStatus::Success);
        assert_eq!(classify(Some(1), None, "", "boom"), SandboxStatus::RuntimeError);
        assert_eq!(classify(Some(1), None, "partial", "boom"), SandboxStatus::Success);
        assert_eq!(classify(Some(3), None, "", "  \n"), SandboxStatus::Success);
    }

    #[test]
    fn test_classify_signals() {
        assert_eq!(
            classify(None, Some(libc::SIGSEGV), "out", ""),
            SandboxStatus::RuntimeError
        );
    }

    #[test]
    fn test_timed_out_discards_output() {
        let outcome = SandboxOutcome::timed_out(
            Duration::from_millis(500),
            Duration::from_millis(510),
            0,
        );
        assert_eq!(outcome.status, SandboxStatus::Timeout);
        assert!(outcome.stdout.is_empty());
        assert_eq!(outcome.stderr, "Time limit of 500 ms exceeded");
    }
}
