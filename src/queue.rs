use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify, oneshot};

use crate::sandbox::{SandboxOutcome, SandboxRequest};

/// A sandbox run waiting for a free worker
pub struct SandboxJob {
    pub id: u64,
    pub request: SandboxRequest,
    pub responder: oneshot::Sender<SandboxOutcome>,
}

pub struct JobQueue {
    queue: Mutex<VecDeque<SandboxJob>>,
    notify: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, job: SandboxJob) {
        self.queue.lock().await.push_back(job);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> SandboxJob {
        loop {
            if let Some(job) = self.queue.lock().await.pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Drops every waiting job; their submitters observe a closed channel
    pub async fn drain(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ByteSize;
    use crate::language::IsolationProfile;

    fn job(id: u64) -> (SandboxJob, oneshot::Receiver<SandboxOutcome>) {
        let (responder, rx) = oneshot::channel();
        let request = SandboxRequest {
            workdir: "/tmp".into(),
            argv: vec!["true".to_string()],
            stdin: String::new(),
            time_limit: Duration::from_secs(1),
            memory_limit: ByteSize(1 << 20),
            profile: IsolationProfile::default(),
            remediation: String::new(),
        };
        (SandboxJob { id, request, responder }, rx)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new();
        let (first, _rx1) = job(1);
        let (second, _rx2) = job(2);
        queue.push(first).await;
        queue.push(second).await;
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.pop().await.id, 1);
        assert_eq!(queue.pop().await.id, 2);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.id })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (pushed, _rx) = job(7);
        queue.push(pushed).await;
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_drain_closes_channels() {
        let queue = JobQueue::new();
        let (pending, rx) = job(3);
        queue.push(pending).await;
        assert_eq!(queue.drain().await, 1);
        assert!(rx.await.is_err());
    }
}
