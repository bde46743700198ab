use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;

use crate::config::SandboxConfig;

use super::{SandboxExecutor, SandboxOutcome, SandboxRequest, collect_output, read_capped};

const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

/// Runs commands as direct child processes
///
/// Each program gets its own process group, a cleared environment and rlimits
/// on CPU time, file size, core dumps and (per profile) address space. This is
/// much weaker than the container backend and is meant for trusted hosts and
/// development.
pub struct ProcessRunner {
    id: usize,
}

#[async_trait]
impl SandboxExecutor for ProcessRunner {
    fn build(id: usize, _config: &SandboxConfig) -> Result<Self> {
        log::info!("ProcessRunner {id} initialized successfully");
        log::warn!("ProcessRunner provides no filesystem or network isolation");
        Ok(Self { id })
    }

    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(&self, request: SandboxRequest) -> SandboxOutcome {
        match self.run_process(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("ProcessRunner {} failed: {e:#}", self.id);
                SandboxOutcome::environment_error(format!("Sandbox failure: {e:#}"))
            }
        }
    }
}

impl ProcessRunner {
    async fn run_process(&self, request: &SandboxRequest) -> Result<SandboxOutcome> {
        let Some((program, args)) = request.argv.split_first() else {
            bail!("Empty command");
        };
        let limits = Rlimits::for_request(request);

        let mut cmd = Command::new(resolve_program(&request.workdir, program));
        cmd.args(args)
            .current_dir(&request.workdir)
            .env_clear()
            .envs(sandbox_environment(&request.workdir))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        // SAFETY: the hook only calls setrlimit, which is async-signal-safe
        unsafe {
            cmd.pre_exec(move || limits.apply());
        }

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(SandboxOutcome::environment_error(missing_toolchain(
                    program,
                    &e,
                    &request.remediation,
                )));
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to spawn `{program}`")),
        };
        let pid = child.id();

        let stdin_task = child.stdin.take().map(|mut stdin| {
            let input = request.stdin.clone().into_bytes();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await
                    && e.kind() != io::ErrorKind::BrokenPipe
                {
                    log::debug!("Failed to write stdin: {e}");
                }
            })
        });
        let stdout_task = child.stdout.take().map(|out| tokio::spawn(read_capped(out)));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(read_capped(err)));

        let deadline = tokio::time::sleep(request.time_limit);
        tokio::pin!(deadline);
        let mut sampler = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut peak_memory = 0;

        let status = loop {
            tokio::select! {
                status = child.wait() => break Some(status?),
                _ = &mut deadline => break None,
                _ = sampler.tick() => {
                    if let Some(pid) = pid {
                        peak_memory = peak_memory.max(read_peak_memory(pid));
                    }
                }
            }
        };
        let elapsed = start.elapsed();

        // Background descendants die with the group either way
        if let Some(pid) = pid {
            kill_process_group(pid);
        }
        if let Some(task) = stdin_task {
            task.abort();
        }

        let Some(status) = status else {
            if let Err(e) = child.kill().await {
                log::warn!("Failed to reap timed out process: {e}");
            }
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                task.abort();
            }
            return Ok(SandboxOutcome::timed_out(
                request.time_limit,
                elapsed,
                peak_memory,
            ));
        };

        let stdout = collect_output(stdout_task).await;
        let stderr = collect_output(stderr_task).await;

        // Threads can burn CPU faster than the wall clock advances
        if status.signal() == Some(libc::SIGXCPU) {
            log::debug!("Process exceeded its CPU time limit after {elapsed:?}");
            return Ok(SandboxOutcome::timed_out(
                request.time_limit,
                elapsed,
                peak_memory,
            ));
        }

        Ok(SandboxOutcome::finished(
            status.code(),
            status.signal(),
            stdout,
            stderr,
            elapsed,
            peak_memory,
        ))
    }
}

#[derive(Debug, Clone, Copy)]
struct Rlimits {
    cpu_seconds: u64,
    file_size: u64,
    address_space: Option<u64>,
}

impl Rlimits {
    fn for_request(request: &SandboxRequest) -> Self {
        Self {
            // Soft limit raises SIGXCPU, the hard limit one second later kills
            cpu_seconds: request.time_limit.as_secs_f64().ceil() as u64 + 1,
            file_size: MAX_FILE_SIZE,
            address_space: request
                .profile
                .limit_address_space
                .then_some(request.memory_limit.0),
        }
    }

    fn apply(&self) -> io::Result<()> {
        set_limit(libc::RLIMIT_CPU, self.cpu_seconds, self.cpu_seconds + 1)?;
        set_limit(libc::RLIMIT_FSIZE, self.file_size, self.file_size)?;
        set_limit(libc::RLIMIT_CORE, 0, 0)?;
        if let Some(bytes) = self.address_space {
            set_limit(libc::RLIMIT_AS, bytes, bytes)?;
        }
        Ok(())
    }
}

fn set_limit(resource: Resource, soft: u64, hard: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn kill_process_group(pid: u32) {
    // ESRCH just means the whole group is already gone
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

/// Relative paths such as `./main` refer to the workspace, not our cwd
fn resolve_program(workdir: &Path, program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && program.contains('/') {
        workdir.join(path)
    } else {
        path.to_path_buf()
    }
}

fn sandbox_environment(workdir: &Path) -> Vec<(&'static str, OsString)> {
    let path = std::env::var_os("PATH").unwrap_or_else(|| OsString::from(DEFAULT_PATH));
    vec![
        ("PATH", path),
        ("HOME", workdir.as_os_str().to_owned()),
        ("TMPDIR", workdir.as_os_str().to_owned()),
        ("LANG", OsString::from("C.UTF-8")),
    ]
}

fn missing_toolchain(program: &str, err: &io::Error, remediation: &str) -> String {
    if remediation.is_empty() {
        format!("Failed to start `{program}`: {err}")
    } else {
        format!("Failed to start `{program}`: {err}. {remediation}")
    }
}

/// Peak resident set size from procfs, 0 when unavailable
fn read_peak_memory(pid: u32) -> u64 {
    let Ok(status) = std::fs::read_to_string(format!("/proc/{pid}/status")) else {
        return 0;
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|value| value.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
        .map_or(0, |kb| kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ByteSize;
    use crate::language::IsolationProfile;
    use crate::sandbox::SandboxStatus;

    fn request(workdir: &Path, argv: &[&str], stdin: &str, limit_ms: u64) -> SandboxRequest {
        SandboxRequest {
            workdir: workdir.to_path_buf(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            stdin: stdin.to_string(),
            time_limit: Duration::from_millis(limit_ms),
            memory_limit: ByteSize(256 * 1024 * 1024),
            profile: IsolationProfile::default(),
            remediation: "Install the toolchain".to_string(),
        }
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::build(0, &SandboxConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner()
            .execute(request(dir.path(), &["cat"], "hello\nworld\n", 5000))
            .await;
        assert_eq!(outcome.status, SandboxStatus::Success);
        assert_eq!(outcome.stdout, "hello\nworld\n");
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let outcome = runner()
            .execute(request(
                dir.path(),
                &["/bin/sh", "-c", "echo started; while :; do :; done"],
                "",
                300,
            ))
            .await;
        assert_eq!(outcome.status, SandboxStatus::Timeout);
        assert!(outcome.stdout.is_empty());
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_background_children_are_killed() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let outcome = runner()
            .execute(request(dir.path(), &["/bin/sh", "-c", "sleep 30 & wait"], "", 300))
            .await;
        assert_eq!(outcome.status, SandboxStatus::Timeout);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_stderr_only_failure_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner()
            .execute(request(dir.path(), &["/bin/sh", "-c", "echo boom >&2; exit 3"], "", 5000))
            .await;
        assert_eq!(outcome.status, SandboxStatus::RuntimeError);
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn test_failure_with_stdout_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner()
            .execute(request(
                dir.path(),
                &["/bin/sh", "-c", "echo partial; echo boom >&2; exit 3"],
                "",
                5000,
            ))
            .await;
        assert_eq!(outcome.status, SandboxStatus::Success);
        assert_eq!(outcome.stdout, "partial\n");
    }

    #[tokio::test]
    async fn test_fatal_signal_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner()
            .execute(request(dir.path(), &["/bin/sh", "-c", "kill -SEGV $$"], "", 5000))
            .await;
        assert_eq!(outcome.status, SandboxStatus::RuntimeError);
        assert_eq!(outcome.signal, Some(libc::SIGSEGV));
        assert_eq!(outcome.exit_code, None);
    }

    #[tokio::test]
    async fn test_cpu_limit_signal_is_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner()
            .execute(request(dir.path(), &["/bin/sh", "-c", "kill -XCPU $$"], "", 5000))
            .await;
        assert_eq!(outcome.status, SandboxStatus::Timeout);
        assert_eq!(outcome.exit_code, None);
    }

    #[tokio::test]
    async fn test_parallel_spinners_are_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let spin = "while :; do :; done";
        let script = format!("{spin} & {spin} & {spin} & {spin} & {spin}");
        let outcome = runner()
            .execute(request(dir.path(), &["/bin/sh", "-c", &script], "", 1000))
            .await;
        assert_eq!(outcome.status, SandboxStatus::Timeout);
    }

    #[test]
    fn test_cpu_soft_limit_precedes_hard_limit() {
        let dir = tempfile::tempdir().unwrap();
        let limits = Rlimits::for_request(&request(dir.path(), &["true"], "", 1500));
        assert_eq!(limits.cpu_seconds, 3);
    }

    #[tokio::test]
    async fn test_missing_binary_is_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner()
            .execute(request(dir.path(), &["codejudge-no-such-binary"], "", 5000))
            .await;
        assert_eq!(outcome.status, SandboxStatus::EnvironmentError);
        assert!(outcome.stderr.contains("Install the toolchain"));
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner()
            .execute(request(dir.path(), &["/bin/sh", "-c", "echo \"$HOME\"; pwd"], "", 5000))
            .await;
        let workdir = dir.path().to_string_lossy().to_string();
        let lines: Vec<&str> = outcome.stdout.lines().collect();
        assert_eq!(lines[0], workdir);
    }

    #[test]
    fn test_resolve_program() {
        let workdir = Path::new("/tmp/ws");
        assert_eq!(resolve_program(workdir, "./main"), PathBuf::from("/tmp/ws/./main"));
        assert_eq!(resolve_program(workdir, "python3"), PathBuf::from("python3"));
        assert_eq!(resolve_program(workdir, "/bin/sh"), PathBuf::from("/bin/sh"));
    }
}
