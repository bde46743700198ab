use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::ExecutionStatus;

#[derive(Debug, Default)]
struct OutcomeCounters {
    total: AtomicU64,
    success: AtomicU64,
    compile_error: AtomicU64,
    runtime_error: AtomicU64,
    timeout: AtomicU64,
    environment_error: AtomicU64,
}

impl OutcomeCounters {
    fn record(&self, status: ExecutionStatus) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            ExecutionStatus::Success => &self.success,
            ExecutionStatus::CompileError => &self.compile_error,
            ExecutionStatus::RuntimeError => &self.runtime_error,
            ExecutionStatus::Timeout => &self.timeout,
            ExecutionStatus::EnvironmentError => &self.environment_error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OutcomeSnapshot {
        OutcomeSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            compile_error: self.compile_error.load(Ordering::Relaxed),
            runtime_error: self.runtime_error.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            environment_error: self.environment_error.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSnapshot {
    pub total: u64,
    pub success: u64,
    pub compile_error: u64,
    pub runtime_error: u64,
    pub timeout: u64,
    pub environment_error: u64,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub compilations: u64,
    pub overall: OutcomeSnapshot,
    pub by_language: BTreeMap<String, OutcomeSnapshot>,
}

/// Process-wide execution counters
///
/// The per-language map is fixed at construction, so recording never takes a lock.
#[derive(Debug)]
pub struct ExecutionStats {
    started_at: DateTime<Utc>,
    compilations: AtomicU64,
    overall: OutcomeCounters,
    by_language: HashMap<String, OutcomeCounters>,
}

impl ExecutionStats {
    pub fn new<'a>(languages: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            started_at: Utc::now(),
            compilations: AtomicU64::new(0),
            overall: OutcomeCounters::default(),
            by_language: languages
                .into_iter()
                .map(|id| (id.to_string(), OutcomeCounters::default()))
                .collect(),
        }
    }

    pub fn record(&self, language: &str, status: ExecutionStatus) {
        self.overall.record(status);
        if let Some(counters) = self.by_language.get(language) {
            counters.record(status);
        }
    }

    pub fn record_compilation(&self) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            compilations: self.compilations(),
            overall: self.overall.snapshot(),
            by_language: self
                .by_language
                .iter()
                .map(|(id, counters)| (id.clone(), counters.snapshot()))
                .collect(),
        }
    }
}
