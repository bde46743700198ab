use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SandboxConfig;

use super::{
    SandboxExecutor, SandboxOutcome, SandboxRequest, SandboxStatus, collect_output, read_capped,
};

/// Extra wall-clock allowance for container start-up
const CONTAINER_START_GRACE: Duration = Duration::from_millis(1000);
const CONTAINER_WORKDIR: &str = "/workspace";
const STATS_RETRY_INTERVAL: Duration = Duration::from_millis(50);

static MEM_USAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\d.]+)\s*([kKMGT]?i?B)\s*/").expect("valid memory usage regex")
});

/// Runs commands inside throwaway Docker containers
///
/// Each execution gets a fresh container with networking disabled, all
/// capabilities dropped, cgroup memory and pid limits, and the workspace
/// bind-mounted as the working directory. The container is force-removed
/// after every run, whatever the outcome.
pub struct ContainerRunner {
    id: usize,
    docker: String,
    cpus: f64,
}

#[async_trait]
impl SandboxExecutor for ContainerRunner {
    fn build(id: usize, config: &SandboxConfig) -> Result<Self> {
        if which::which(&config.docker_binary).is_err() {
            log::warn!(
                "ContainerRunner {id}: `{}` not found on PATH, executions will fail",
                config.docker_binary
            );
        }
        log::info!("ContainerRunner {id} initialized successfully");

        Ok(Self {
            id,
            docker: config.docker_binary.clone(),
            cpus: config.cpus,
        })
    }

    fn name(&self) -> &'static str {
        "container"
    }

    async fn execute(&self, request: SandboxRequest) -> SandboxOutcome {
        let name = format!("codejudge-{}-{}", self.id, Uuid::new_v4().simple());

        let result = self.run_container(&name, &request).await;
        self.remove_container(&name).await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("ContainerRunner {} failed: {e:#}", self.id);
                SandboxOutcome::environment_error(format!("Sandbox failure: {e:#}"))
            }
        }
    }
}

impl ContainerRunner {
    fn docker(&self) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.kill_on_drop(true);
        cmd
    }

    fn run_command(&self, name: &str, request: &SandboxRequest) -> Command {
        let memory = request.memory_limit.0.to_string();
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };

        let mut mount = request.workdir.as_os_str().to_os_string();
        mount.push(":");
        mount.push(CONTAINER_WORKDIR);

        let mut cmd = self.docker();
        cmd.args(["run", "--interactive", "--name", name])
            .args(["--network", "none"])
            .arg("--cap-drop=ALL")
            .arg("--security-opt=no-new-privileges")
            .args(["--ulimit", "core=0"])
            .arg("--pids-limit")
            .arg(request.profile.max_processes.to_string())
            .arg("--memory")
            .arg(&memory)
            .arg("--memory-swap")
            .arg(&memory)
            .arg("--cpus")
            .arg(self.cpus.to_string())
            .arg("--user")
            .arg(format!("{uid}:{gid}"))
            .args(["--env", "HOME=/tmp", "--tmpfs", "/tmp:rw,exec,size=64m"])
            .arg("--volume")
            .arg(mount)
            .args(["--workdir", CONTAINER_WORKDIR])
            .arg(&request.profile.image)
            .args(&request.argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run_container(&self, name: &str, request: &SandboxRequest) -> Result<SandboxOutcome> {
        if request.argv.is_empty() {
            bail!("Empty command");
        }

        let mut cmd = self.run_command(name, request);
        log::debug!("Container command is {:?}", cmd.as_std());

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(SandboxOutcome::environment_error(format!(
                    "Failed to start `{}`: {e}. Install Docker or switch to the process backend",
                    self.docker
                )));
            }
            Err(e) => return Err(e).context("Failed to spawn the container runtime"),
        };

        if let Some(mut stdin) = child.stdin.take() {
            let input = request.stdin.clone().into_bytes();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await
                    && e.kind() != io::ErrorKind::BrokenPipe
                {
                    log::debug!("Failed to write container stdin: {e}");
                }
            });
        }
        let stdout_task = child.stdout.take().map(|out| tokio::spawn(read_capped(out)));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(read_capped(err)));
        let peak_memory = Arc::new(AtomicU64::new(0));
        let sampler = AbortOnDrop(tokio::spawn(sample_memory(
            self.docker.clone(),
            name.to_string(),
            Arc::clone(&peak_memory),
        )));

        let waited =
            tokio::time::timeout(request.time_limit + CONTAINER_START_GRACE, child.wait()).await;
        let elapsed = start.elapsed();

        let status = match waited {
            Ok(status) => status.context("Failed to wait for the container")?,
            Err(_) => {
                self.kill_container(name).await;
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to reap container client: {e}");
                }
                for task in [stdout_task, stderr_task].into_iter().flatten() {
                    task.abort();
                }
                drop(sampler);
                return Ok(SandboxOutcome::timed_out(
                    request.time_limit,
                    elapsed,
                    peak_memory.load(Ordering::Relaxed),
                ));
            }
        };
        drop(sampler);
        let peak_memory = peak_memory.load(Ordering::Relaxed);

        let stdout = collect_output(stdout_task).await;
        let stderr = collect_output(stderr_task).await;
        let code = status.code();

        match code {
            // Daemon-side failure such as a missing image
            Some(125) => {
                return Ok(SandboxOutcome::environment_error(format!(
                    "Container runtime error: {}",
                    stderr.trim()
                )));
            }
            // Command not executable or not found inside the image
            Some(126 | 127) if stdout.is_empty() => {
                return Ok(SandboxOutcome::environment_error(format!(
                    "{} {}",
                    stderr.trim(),
                    request.remediation
                )));
            }
            _ => {}
        }

        let state = self.inspect_state(name).await;
        if state.oom_killed {
            let memory_limit = request.memory_limit.0;
            return Ok(SandboxOutcome {
                status: SandboxStatus::RuntimeError,
                exit_code: None,
                signal: Some(libc::SIGKILL),
                stdout,
                stderr: format!("{stderr}Memory limit of {memory_limit} bytes exceeded"),
                elapsed,
                memory_bytes: memory_limit,
            });
        }

        // The client's wall clock includes container start-up, the daemon's does not
        let elapsed = state.runtime.unwrap_or(elapsed);
        if elapsed > request.time_limit {
            return Ok(SandboxOutcome::timed_out(
                request.time_limit,
                elapsed,
                peak_memory,
            ));
        }

        let (exit_code, signal) = split_container_exit(code);
        Ok(SandboxOutcome::finished(
            exit_code,
            signal,
            stdout,
            stderr,
            elapsed,
            peak_memory,
        ))
    }

    async fn inspect_state(&self, name: &str) -> ContainerState {
        let output = self
            .docker()
            .args([
                "inspect",
                "--format",
                "{{.State.OOMKilled}} {{.State.StartedAt}} {{.State.FinishedAt}}",
                name,
            ])
            .stderr(Stdio::null())
            .output()
            .await;
        match output {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.stdout);
                parse_state(&text).unwrap_or_else(|| {
                    log::warn!("Unexpected inspect output for container {name}: {text:?}");
                    ContainerState::default()
                })
            }
            Err(e) => {
                log::warn!("Failed to inspect container {name}: {e}");
                ContainerState::default()
            }
        }
    }

    async fn kill_container(&self, name: &str) {
        let status = self
            .docker()
            .args(["kill", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            log::warn!("Failed to kill container {name}: {e}");
        }
    }

    async fn remove_container(&self, name: &str) {
        // Kills the container if still running
        let status = self
            .docker()
            .args(["rm", "--force", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            log::warn!("Failed to remove container {name}: {e}");
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct ContainerState {
    oom_killed: bool,
    /// Time between the daemon starting and reaping the container
    runtime: Option<Duration>,
}

fn parse_state(text: &str) -> Option<ContainerState> {
    let mut fields = text.split_whitespace();
    let oom_killed = match fields.next()? {
        "true" => true,
        "false" => false,
        _ => return None,
    };
    let started = fields.next().and_then(parse_timestamp);
    let finished = fields.next().and_then(parse_timestamp);
    let runtime = match (started, finished) {
        (Some(started), Some(finished)) => (finished - started).to_std().ok(),
        _ => None,
    };
    Some(ContainerState { oom_killed, runtime })
}

/// Docker writes `0001-01-01T00:00:00Z` for events that never happened
fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .filter(|time| time.year() > 1)
}

/// Parses the usage half of a `docker stats` MemUsage column such as `12.5MiB / 256MiB`
fn parse_mem_usage(line: &str) -> Option<u64> {
    let captures = MEM_USAGE.captures(line)?;
    let value: f64 = captures[1].parse().ok()?;
    let unit: u64 = match &captures[2] {
        "B" => 1,
        "KiB" => 1 << 10,
        "kB" | "KB" => 1_000,
        "MiB" => 1 << 20,
        "MB" => 1_000_000,
        "GiB" => 1 << 30,
        "GB" => 1_000_000_000,
        "TiB" => 1 << 40,
        "TB" => 1_000_000_000_000,
        _ => return None,
    };
    Some((value * unit as f64).round() as u64)
}

/// Streams `docker stats` for the container and keeps the highest usage seen
///
/// The stats stream fails until the daemon has created the container, so the
/// command is retried until the task is aborted.
async fn sample_memory(docker: String, name: String, peak: Arc<AtomicU64>) {
    loop {
        let spawned = Command::new(&docker)
            .args(["stats", "--format", "{{.MemUsage}}", &name])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                log::debug!("Memory sampling for {name} unavailable: {e}");
                return;
            }
        };
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(bytes) = parse_mem_usage(&line) {
                    peak.fetch_max(bytes, Ordering::Relaxed);
                }
            }
        }
        let _ = child.wait().await;
        tokio::time::sleep(STATS_RETRY_INTERVAL).await;
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The docker client reports death by signal N as exit status 128 + N
fn split_container_exit(code: Option<i32>) -> (Option<i32>, Option<i32>) {
    match code {
        Some(code) if code > 128 => (None, Some(code - 128)),
        Some(code) => (Some(code), None),
        None => (None, Some(libc::SIGKILL)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ByteSize;
    use crate::language::IsolationProfile;

    fn request() -> SandboxRequest {
        SandboxRequest {
            workdir: "/tmp/ws".into(),
            argv: vec!["python3".to_string(), "main.py".to_string()],
            stdin: String::new(),
            time_limit: Duration::from_millis(2000),
            memory_limit: ByteSize(128 * 1024 * 1024),
            profile: IsolationProfile {
                image: "python:3.11-alpine".to_string(),
                ..Default::default()
            },
            remediation: String::new(),
        }
    }

    #[test]
    fn test_run_command_is_locked_down() {
        let runner = ContainerRunner::build(1, &SandboxConfig::default()).unwrap();
        let cmd = runner.run_command("codejudge-1-test", &request());
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        let joined = args.join(" ");
        assert!(joined.contains("--network none"));
        assert!(joined.contains("--cap-drop=ALL"));
        assert!(joined.contains("--memory 134217728 --memory-swap 134217728"));
        assert!(joined.contains("--pids-limit 64"));
        assert!(joined.contains("--volume /tmp/ws:/workspace"));
        assert!(joined.ends_with("python:3.11-alpine python3 main.py"));
    }

    #[test]
    fn test_signal_exit_codes() {
        assert_eq!(split_container_exit(Some(0)), (Some(0), None));
        assert_eq!(split_container_exit(Some(1)), (Some(1), None));
        assert_eq!(split_container_exit(Some(139)), (None, Some(libc::SIGSEGV)));
    }

    #[test]
    fn test_runtime_comes_from_daemon_timestamps() {
        let state = parse_state(
            "false 2024-03-01T10:00:00.250000000Z 2024-03-01T10:00:01.750000000Z\n",
        )
        .unwrap();
        assert!(!state.oom_killed);
        assert_eq!(state.runtime, Some(Duration::from_millis(1500)));
        assert!(state.runtime.unwrap() > Duration::from_secs(1));
    }

    #[test]
    fn test_unset_timestamps_have_no_runtime() {
        let state =
            parse_state("true 2024-03-01T10:00:00Z 0001-01-01T00:00:00Z").unwrap();
        assert_eq!(
            state,
            ContainerState {
                oom_killed: true,
                runtime: None
            }
        );
        assert_eq!(parse_state(""), None);
        assert_eq!(parse_state("Error: No such object"), None);
    }

    #[test]
    fn test_mem_usage_units() {
        assert_eq!(parse_mem_usage("12.5MiB / 256MiB"), Some(13_107_200));
        assert_eq!(parse_mem_usage("512KiB / 128MiB"), Some(524_288));
        assert_eq!(parse_mem_usage("1.2GB / 2GB"), Some(1_200_000_000));
        assert_eq!(parse_mem_usage("\u{1b}[2J\u{1b}[H0B / 0B"), Some(0));
        assert_eq!(parse_mem_usage("--"), None);
    }

    #[tokio::test]
    async fn test_missing_docker_is_environment_error() {
        let config = SandboxConfig {
            docker_binary: "codejudge-no-such-docker".to_string(),
            ..Default::default()
        };
        let runner = ContainerRunner::build(0, &config).unwrap();
        let outcome = runner.execute(request()).await;
        assert_eq!(outcome.status, SandboxStatus::EnvironmentError);
        assert!(outcome.stderr.contains("codejudge-no-such-docker"));
    }
}
