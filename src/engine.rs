use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::judge::Judge;
use crate::language::LanguageRegistry;
use crate::pipeline::ExecutionPipeline;
use crate::queue::JobQueue;
use crate::stats::ExecutionStats;
use crate::worker::{SandboxPool, spawn_workers};

/// Running execution engine: the sandbox workers plus the handles that feed them
pub struct Engine {
    pipeline: ExecutionPipeline,
    judge: Judge,
    queue: Arc<JobQueue>,
    token: CancellationToken,
    workers: JoinSet<anyhow::Result<()>>,
}

impl Engine {
    /// Spawns the worker pool described by `config`; must be called inside a tokio runtime
    pub fn start(config: &Config) -> anyhow::Result<Self> {
        let registry = Arc::new(LanguageRegistry::with_overrides(config.languages.clone()));
        let stats = Arc::new(ExecutionStats::new(registry.ids()));

        let workspace_root = config.sandbox.workspace_root();
        std::fs::create_dir_all(&workspace_root).with_context(|| {
            format!(
                "Failed to create workspace root {}",
                workspace_root.display()
            )
        })?;

        let queue = Arc::new(JobQueue::new());
        let token = CancellationToken::new();
        let workers = spawn_workers(&config.sandbox, queue.clone(), token.clone())?;
        log::info!(
            "Started {} sandbox workers ({:?} backend), workspaces under {}",
            workers.len(),
            config.sandbox.backend,
            workspace_root.display()
        );

        let pool = SandboxPool::new(queue.clone(), token.clone());
        let pipeline = ExecutionPipeline::new(
            registry,
            pool,
            stats,
            workspace_root,
            config.limits.clone(),
        );
        let judge = Judge::new(pipeline.clone());

        Ok(Self {
            pipeline,
            judge,
            queue,
            token,
            workers,
        })
    }

    pub fn pipeline(&self) -> &ExecutionPipeline {
        &self.pipeline
    }

    pub fn judge(&self) -> &Judge {
        &self.judge
    }

    /// Resolves when a worker stops on its own, which only happens on failure
    pub async fn worker_exited(&mut self) -> Option<String> {
        let res = self.workers.join_next().await?;
        Some(match res {
            Ok(Ok(())) => "worker exited".to_string(),
            Ok(Err(e)) => format!("worker failed: {e:#}"),
            Err(e) => format!("worker task failed: {e}"),
        })
    }

    /// Cancels the workers, fails queued jobs and waits for every worker to stop
    pub async fn shutdown(mut self) {
        self.token.cancel();
        let dropped = self.queue.drain().await;
        if dropped > 0 {
            log::warn!("Dropped {dropped} queued sandbox jobs during shutdown");
        }
        log::info!("Shutdown signal sent to workers, waiting for them to finish...");

        while let Some(res) = self.workers.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Worker finished with error: {e:#}"),
                Err(e) if e.is_panic() => log::error!("Worker handle panicked: {e:?}"),
                Err(e) => log::error!("Worker handle finished with error: {e:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::pipeline::{ExecutionRequest, ExecutionStatus};

    #[tokio::test]
    async fn test_engine_runs_and_shuts_down() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            sandbox: SandboxConfig {
                workers: Some(1),
                workspace_root: Some(root.path().join("workspaces")),
                ..Default::default()
            },
            languages: vec![serde_json::from_value(serde_json::json!({
                "id": "shell",
                "display_name": "POSIX Shell",
                "file_extension": ".sh",
                "source_file_name": "main.sh",
                "run_command": ["/bin/sh", "%INPUT%"]
            }))
            .unwrap()],
            ..Default::default()
        };

        let engine = Engine::start(&config).unwrap();
        let result = engine
            .pipeline()
            .execute(&ExecutionRequest {
                source_code: "read x; echo \"got $x\"".to_string(),
                language_id: "shell".to_string(),
                stdin: "7\n".to_string(),
                ..Default::default()
            })
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, "got 7\n");

        engine.shutdown().await;
    }
}
