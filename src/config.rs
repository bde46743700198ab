use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::language::LanguageSpec;

#[derive(Parser)]
#[command(name = "codejudge", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Number of sandbox workers, overriding the configuration file
    #[arg(long = "workers", short = 't')]
    pub workers: Option<usize>,

    /// Sandbox backend, overriding the configuration file
    #[arg(long = "backend", value_enum)]
    pub backend: Option<SandboxBackend>,
}

impl CliArgs {
    /// Load the configuration from the specified file, then apply CLI overrides
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)?
            }
            None => Config::default(),
        };

        if let Some(workers) = self.workers {
            config.sandbox.workers = Some(workers);
        }
        if let Some(backend) = self.backend {
            config.sandbox.backend = backend;
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub limits: LimitsConfig,
    /// Extra languages, or replacements for built-in ones with the same id
    pub languages: Vec<LanguageSpec>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SandboxBackend {
    /// Direct child processes constrained by rlimits
    #[default]
    Process,
    /// Docker containers with networking disabled and cgroup limits
    Container,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    pub workers: Option<usize>,
    pub workspace_root: Option<PathBuf>,
    pub docker_binary: String,
    pub cpus: f64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Process,
            workers: None,
            workspace_root: None,
            docker_binary: "docker".to_string(),
            cpus: 1.0,
        }
    }
}

impl SandboxConfig {
    /// Number of sandbox workers, defaulting to the host's available parallelism
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Directory under which per-execution workspaces are created
    pub fn workspace_root(&self) -> PathBuf {
        use directories::ProjectDirs;

        if let Some(root) = &self.workspace_root {
            return root.clone();
        }

        match ProjectDirs::from("", "", "codejudge") {
            Some(proj_dirs) => proj_dirs.cache_dir().join("workspaces"),
            None => std::env::temp_dir().join("codejudge-workspaces"),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_execution_time: MilliSecond,
    pub default_execution_time: MilliSecond,
    pub max_code_size: ByteSize,
    pub max_stdin_size: ByteSize,
    pub max_test_cases: usize,
    pub memory_limit: ByteSize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_execution_time: MilliSecond(10_000),
            default_execution_time: MilliSecond(5_000),
            max_code_size: ByteSize(1024 * 1024),
            max_stdin_size: ByteSize(64 * 1024),
            max_test_cases: 100,
            memory_limit: ByteSize(256 * 1024 * 1024),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}
