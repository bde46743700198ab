use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{ByteSize, LimitsConfig};
use crate::language::{ARTIFACT_NAME, LanguageRegistry, LanguageSpec};
use crate::sandbox::{SandboxOutcome, SandboxRequest, SandboxStatus, Workspace};
use crate::stats::ExecutionStats;
use crate::worker::SandboxPool;

/// Compilers get at least this much memory regardless of the run limit
const COMPILE_MEMORY_LIMIT: ByteSize = ByteSize(1024 * 1024 * 1024);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    CompileError,
    RuntimeError,
    Timeout,
    EnvironmentError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub compile_time_ms: u64,
    pub run_time_ms: u64,
    pub memory_bytes: u64,
}

impl ExecutionResult {
    pub fn environment_error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::EnvironmentError,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
            compile_time_ms: 0,
            run_time_ms: 0,
            memory_bytes: 0,
        }
    }

    fn compile_error(output: String, compile_time_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::CompileError,
            stdout: String::new(),
            stderr: output,
            exit_code: None,
            compile_time_ms,
            run_time_ms: 0,
            memory_bytes: 0,
        }
    }

    fn from_outcome(outcome: SandboxOutcome, compile_time_ms: u64) -> Self {
        let status = match outcome.status {
            SandboxStatus::Success => ExecutionStatus::Success,
            SandboxStatus::RuntimeError => ExecutionStatus::RuntimeError,
            SandboxStatus::Timeout => ExecutionStatus::Timeout,
            SandboxStatus::EnvironmentError => ExecutionStatus::EnvironmentError,
        };
        let mut stderr = outcome.stderr;
        if status == ExecutionStatus::RuntimeError
            && stderr.trim().is_empty()
            && let Some(signal) = outcome.signal
        {
            stderr = format!("Process terminated by signal {signal}");
        }

        Self {
            status,
            stdout: outcome.stdout,
            stderr,
            exit_code: outcome.exit_code,
            compile_time_ms,
            run_time_ms: outcome.elapsed.as_millis() as u64,
            memory_bytes: outcome.memory_bytes,
        }
    }
}

/// Source to compile and run once against a single stdin
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language_id: String,
    pub stdin: String,
    pub time_limit_ms: Option<u64>,
    pub memory_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub time_limit: Duration,
    pub memory_limit: ByteSize,
}

/// Compiled (or staged, for interpreted languages) program, reusable across runs
///
/// Owns the build workspace; each run copies it into a fresh one.
#[derive(Debug)]
pub struct CompiledArtifact {
    language: Arc<LanguageSpec>,
    workspace: Workspace,
    compile_time_ms: u64,
    compiler_output: String,
}

impl CompiledArtifact {
    pub fn language(&self) -> &LanguageSpec {
        &self.language
    }

    pub fn compile_time_ms(&self) -> u64 {
        self.compile_time_ms
    }

    /// Diagnostics printed by a successful compile, such as warnings
    pub fn compiler_output(&self) -> &str {
        &self.compiler_output
    }
}

#[derive(Debug)]
pub enum CompileOutcome {
    Ready(Arc<CompiledArtifact>),
    Failed(ExecutionResult),
}

/// Compile-then-run driver on top of the sandbox pool
#[derive(Clone)]
pub struct ExecutionPipeline {
    registry: Arc<LanguageRegistry>,
    pool: SandboxPool,
    stats: Arc<ExecutionStats>,
    workspace_root: Arc<PathBuf>,
    limits: Arc<LimitsConfig>,
}

impl ExecutionPipeline {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        pool: SandboxPool,
        stats: Arc<ExecutionStats>,
        workspace_root: PathBuf,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            stats,
            workspace_root: Arc::new(workspace_root),
            limits: Arc::new(limits),
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Effective limits: the service default (capped by the language's run timeout)
    /// when unset, never above the configured maximum
    pub fn limits_for(
        &self,
        language: &LanguageSpec,
        time_limit_ms: Option<u64>,
        memory_limit_bytes: Option<u64>,
    ) -> RunLimits {
        let max_time = self.limits.max_execution_time.0;
        let default_time = self.limits.default_execution_time.0.min(language.run_timeout.0);
        let time_ms = time_limit_ms
            .unwrap_or(default_time)
            .min(max_time)
            .max(1);
        RunLimits {
            time_limit: Duration::from_millis(time_ms),
            memory_limit: ByteSize(memory_limit_bytes.unwrap_or(self.limits.memory_limit.0)),
        }
    }

    /// Compile, then run once
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let language = match self.registry.resolve(&request.language_id) {
            Ok(language) => language,
            Err(e) => {
                let result = ExecutionResult::environment_error(e.to_string());
                self.stats.record(&request.language_id, result.status);
                return result;
            }
        };

        let artifact = match self.compile(&language, &request.source_code).await {
            CompileOutcome::Ready(artifact) => artifact,
            CompileOutcome::Failed(result) => return result,
        };

        let limits = self.limits_for(
            &language,
            request.time_limit_ms,
            request.memory_limit_bytes,
        );
        self.run(&artifact, &request.stdin, limits).await
    }

    pub async fn compile(&self, language: &Arc<LanguageSpec>, source: &str) -> CompileOutcome {
        let outcome = match self.try_compile(language, source).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Failed to prepare {} build: {e:#}", language.id);
                CompileOutcome::Failed(ExecutionResult::environment_error(format!("{e:#}")))
            }
        };
        if let CompileOutcome::Failed(result) = &outcome {
            self.stats.record(&language.id, result.status);
        }
        outcome
    }

    async fn try_compile(&self, language: &Arc<LanguageSpec>, source: &str) -> Result<CompileOutcome> {
        let workspace = Workspace::create(&self.workspace_root)?;
        workspace.write_file(&language.source_file_name, &format!("{source}\n"))?;

        let Some(argv) = language.compile_argv() else {
            return Ok(CompileOutcome::Ready(Arc::new(CompiledArtifact {
                language: language.clone(),
                workspace,
                compile_time_ms: 0,
                compiler_output: String::new(),
            })));
        };

        self.stats.record_compilation();
        log::debug!("Compiling {} in workspace {}", language.id, workspace.id());

        let outcome = self
            .pool
            .submit(SandboxRequest {
                workdir: workspace.path().to_path_buf(),
                argv,
                stdin: String::new(),
                time_limit: language.compile_timeout.into(),
                memory_limit: COMPILE_MEMORY_LIMIT.max(self.limits.memory_limit),
                profile: language.isolation_profile.clone(),
                remediation: language.remediation.clone(),
            })
            .await;

        let compile_time_ms = outcome.elapsed.as_millis() as u64;
        let compiler_output = join_output(&outcome.stdout, &outcome.stderr);

        let failure = match outcome.status {
            SandboxStatus::EnvironmentError => {
                let mut result = ExecutionResult::environment_error(outcome.stderr);
                result.compile_time_ms = compile_time_ms;
                Some(result)
            }
            SandboxStatus::Timeout => Some(ExecutionResult::compile_error(
                format!(
                    "Compilation timed out after {} ms",
                    language.compile_timeout.0
                ),
                compile_time_ms,
            )),
            _ if outcome.exit_code != Some(0) => Some(ExecutionResult::compile_error(
                compiler_output.clone(),
                compile_time_ms,
            )),
            _ if language.produces_artifact()
                && !workspace.path().join(ARTIFACT_NAME).exists() =>
            {
                Some(ExecutionResult::compile_error(
                    format!("{compiler_output}\nCompiler did not produce an executable")
                        .trim()
                        .to_string(),
                    compile_time_ms,
                ))
            }
            _ => None,
        };

        match failure {
            Some(result) => Ok(CompileOutcome::Failed(result)),
            None => Ok(CompileOutcome::Ready(Arc::new(CompiledArtifact {
                language: language.clone(),
                workspace,
                compile_time_ms,
                compiler_output,
            }))),
        }
    }

    /// Runs a compiled artifact in a fresh workspace
    pub async fn run(
        &self,
        artifact: &CompiledArtifact,
        stdin: &str,
        limits: RunLimits,
    ) -> ExecutionResult {
        let result = match self.try_run(artifact, stdin, limits).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Failed to prepare {} run: {e:#}", artifact.language.id);
                let mut result = ExecutionResult::environment_error(format!("{e:#}"));
                result.compile_time_ms = artifact.compile_time_ms;
                result
            }
        };
        self.stats.record(&artifact.language.id, result.status);
        result
    }

    async fn try_run(
        &self,
        artifact: &CompiledArtifact,
        stdin: &str,
        limits: RunLimits,
    ) -> Result<ExecutionResult> {
        let language = &artifact.language;
        let workspace = Workspace::create(&self.workspace_root)?;
        workspace.copy_from(&artifact.workspace)?;

        let outcome = self
            .pool
            .submit(SandboxRequest {
                workdir: workspace.path().to_path_buf(),
                argv: language.run_argv(),
                stdin: stdin.to_string(),
                time_limit: limits.time_limit,
                memory_limit: limits.memory_limit,
                profile: language.isolation_profile.clone(),
                remediation: language.remediation.clone(),
            })
            .await;

        if let Err(e) = workspace.close() {
            log::warn!("{e:#}");
        }
        Ok(ExecutionResult::from_outcome(
            outcome,
            artifact.compile_time_ms,
        ))
    }
}

fn join_output(stdout: &str, stderr: &str) -> String {
    [stdout.trim_end(), stderr.trim_end()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobQueue;
    use tokio_util::sync::CancellationToken;

    fn pipeline() -> ExecutionPipeline {
        let registry = Arc::new(LanguageRegistry::builtin());
        let stats = Arc::new(ExecutionStats::new(registry.ids()));
        let pool = SandboxPool::new(Arc::new(JobQueue::new()), CancellationToken::new());
        ExecutionPipeline::new(
            registry,
            pool,
            stats,
            std::env::temp_dir(),
            LimitsConfig::default(),
        )
    }

    #[test]
    fn test_limits_default_to_service_default() {
        let pipeline = pipeline();
        let python = pipeline.registry().resolve("python").unwrap();
        let limits = pipeline.limits_for(&python, None, None);
        assert_eq!(limits.time_limit, Duration::from_millis(5_000));
        assert_eq!(limits.memory_limit, ByteSize(256 * 1024 * 1024));
    }

    #[test]
    fn test_limits_are_clamped() {
        let pipeline = pipeline();
        let cpp = pipeline.registry().resolve("cpp").unwrap();
        assert_eq!(
            pipeline.limits_for(&cpp, Some(60_000), Some(64)).time_limit,
            Duration::from_millis(10_000)
        );
        assert_eq!(
            pipeline.limits_for(&cpp, Some(500), None).time_limit,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_signal_without_stderr_is_described() {
        let outcome = SandboxOutcome::finished(
            None,
            Some(libc::SIGSEGV),
            String::new(),
            String::new(),
            Duration::from_millis(3),
            0,
        );
        let result = ExecutionResult::from_outcome(outcome, 7);
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert_eq!(result.stderr, format!("Process terminated by signal {}", libc::SIGSEGV));
        assert_eq!(result.compile_time_ms, 7);
    }

    #[test]
    fn test_join_output() {
        assert_eq!(join_output("", "error: x\n"), "error: x");
        assert_eq!(join_output("note\n", "error\n"), "note\nerror");
    }

    #[tokio::test]
    async fn test_unknown_language_is_environment_error() {
        let pipeline = pipeline();
        let result = pipeline
            .execute(&ExecutionRequest {
                source_code: "print(1)".to_string(),
                language_id: "cobol".to_string(),
                ..Default::default()
            })
            .await;
        assert_eq!(result.status, ExecutionStatus::EnvironmentError);
        assert_eq!(pipeline.stats().snapshot().overall.environment_error, 1);
    }
}
