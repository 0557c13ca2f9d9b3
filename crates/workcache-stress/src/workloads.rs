use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use workcache::{CacheKey, CacheStrategy, Work, WorkCache, WorkError};

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn validate(&self) -> Result<()> {
        for (i, workload) in self.workloads.iter().enumerate() {
            if workload.concurrency == 0 {
                anyhow::bail!("workload {i}: concurrency must be positive");
            }
            if workload.keys == 0 {
                anyhow::bail!("workload {i}: keys must be positive");
            }
            if !(0.0..=1.0).contains(&workload.failure_rate) {
                anyhow::bail!("workload {i}: failure_rate must be within 0 and 1");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct Workload {
    /// Number of requests in flight at any time.
    pub concurrency: usize,
    /// Requests pick their key uniformly out of this many.
    pub keys: u64,
    /// Overrides the configured default strategy.
    #[serde(default)]
    pub strategy: Option<CacheStrategy>,
    /// How long each computation takes.
    #[serde(with = "humantime_serde")]
    pub work_duration: Duration,
    /// Probability of a computation failing.
    #[serde(default)]
    pub failure_rate: f64,
}

/// Outcome counters of a single workload.
#[derive(Debug, Default)]
pub struct Counters {
    executions: AtomicUsize,
    failures: AtomicUsize,
    cancellations: AtomicUsize,
}

impl Counters {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::Relaxed)
    }
}

fn prepare_work(workload: &Workload, counters: &Arc<Counters>) -> (CacheKey, Work<u64>) {
    let key = CacheKey(rand::random_range(0..workload.keys));
    let work_duration = workload.work_duration;
    let fails = rand::random_bool(workload.failure_rate);
    let counters = Arc::clone(counters);

    let work = Work::new(async move {
        counters.executions.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(work_duration).await;
        if fails {
            anyhow::bail!("computation for key {key} failed");
        }
        Ok::<_, anyhow::Error>(key.0)
    });

    (key, work)
}

/// Issues a single request against `cache`, and records its outcome.
pub async fn process_request(cache: &WorkCache, workload: &Workload, counters: &Arc<Counters>) {
    let (key, work) = prepare_work(workload, counters);
    let shared = match workload.strategy {
        Some(strategy) => cache.handle_with(strategy, work, key),
        None => cache.handle(work, key),
    };

    match shared.run().await {
        Ok(_) => {}
        Err(WorkError::Cancelled) => {
            counters.cancellations.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            tracing::trace!(%key, error = %err, "request failed");
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}
