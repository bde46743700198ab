use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::SandboxConfig;
use crate::queue::{JobQueue, SandboxJob};
use crate::sandbox::{SandboxExecutor, SandboxOutcome, SandboxRequest, create_sandbox_executor};

pub async fn worker(
    id: usize,
    executor: Box<dyn SandboxExecutor>,
    queue: Arc<JobQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized with the {} backend", executor.name());

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            job = queue.pop() => {
                let SandboxJob { id: job_id, request, responder } = job;
                log::debug!("Worker {id} got sandbox job {job_id} from queue");

                let outcome = executor.execute(request).await;
                log::debug!("Sandbox job {job_id} finished on worker {id}: {:?}", outcome.status);

                if responder.send(outcome).is_err() {
                    log::warn!("Submitter of sandbox job {job_id} went away before the result arrived");
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

/// Spawns one worker per configured slot, each owning its own executor
pub fn spawn_workers(
    config: &SandboxConfig,
    queue: Arc<JobQueue>,
    token: CancellationToken,
) -> anyhow::Result<JoinSet<anyhow::Result<()>>> {
    let n_workers = config.worker_count();
    if n_workers == 0 {
        anyhow::bail!("The number of sandbox workers must not be 0");
    }

    let mut workers = JoinSet::new();
    for i in 1..=n_workers {
        let executor = create_sandbox_executor(i, config)?;
        workers.spawn(worker(i, executor, queue.clone(), token.clone()));
    }
    Ok(workers)
}

/// Handle used by the pipeline to hand sandbox runs to the worker pool
#[derive(Clone)]
pub struct SandboxPool {
    queue: Arc<JobQueue>,
    token: CancellationToken,
    next_id: Arc<AtomicU64>,
}

impl SandboxPool {
    pub fn new(queue: Arc<JobQueue>, token: CancellationToken) -> Self {
        Self {
            queue,
            token,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Queues the request and waits for a worker to finish it
    pub async fn submit(&self, request: SandboxRequest) -> SandboxOutcome {
        if self.token.is_cancelled() {
            return SandboxOutcome::environment_error("Sandbox pool is shutting down");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, rx) = oneshot::channel();
        self.queue
            .push(SandboxJob {
                id,
                request,
                responder,
            })
            .await;

        tokio::select! {
            result = rx => result.unwrap_or_else(|_| {
                SandboxOutcome::environment_error("Sandbox worker dropped the job")
            }),
            _ = self.token.cancelled() => {
                SandboxOutcome::environment_error("Sandbox pool is shutting down")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ByteSize;
    use crate::language::IsolationProfile;
    use crate::sandbox::SandboxStatus;

    fn echo_request(text: &str) -> SandboxRequest {
        SandboxRequest {
            workdir: std::env::temp_dir(),
            argv: vec!["/bin/sh".to_string(), "-c".to_string(), format!("echo {text}")],
            stdin: String::new(),
            time_limit: Duration::from_secs(5),
            memory_limit: ByteSize(256 * 1024 * 1024),
            profile: IsolationProfile::default(),
            remediation: String::new(),
        }
    }

    #[tokio::test]
    async fn test_pool_runs_jobs_concurrently() {
        let config = SandboxConfig {
            workers: Some(2),
            ..Default::default()
        };
        let queue = Arc::new(JobQueue::new());
        let token = CancellationToken::new();
        let mut workers = spawn_workers(&config, queue.clone(), token.clone()).unwrap();
        let pool = SandboxPool::new(queue, token.clone());

        let (a, b) = tokio::join!(pool.submit(echo_request("a")), pool.submit(echo_request("b")));
        assert_eq!(a.stdout, "a\n");
        assert_eq!(b.stdout, "b\n");

        token.cancel();
        while let Some(res) = workers.join_next().await {
            assert!(res.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let queue = Arc::new(JobQueue::new());
        let token = CancellationToken::new();
        let pool = SandboxPool::new(queue, token.clone());
        token.cancel();

        let outcome = pool.submit(echo_request("late")).await;
        assert_eq!(outcome.status, SandboxStatus::EnvironmentError);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = SandboxConfig {
            workers: Some(0),
            ..Default::default()
        };
        let result = spawn_workers(&config, Arc::new(JobQueue::new()), CancellationToken::new());
        assert!(result.is_err());
    }
}
