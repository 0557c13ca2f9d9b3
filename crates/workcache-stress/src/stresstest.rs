use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use workcache::config::Config;
use workcache::{TaskExecutor, WorkCache, wait_until};

use crate::workloads::{Counters, WorkloadsConfig, process_request};

pub async fn perform_stresstest(
    config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    tracing::info!(
        workloads = workloads.workloads.len(),
        strategy = ?config.default_strategy,
        "starting stresstest"
    );

    let executor = TaskExecutor::current();
    let poll_interval = config.poll_interval;

    // run the workloads concurrently, each against its own cache
    let mut tasks = Vec::with_capacity(workloads.workloads.len());
    for workload in workloads.workloads {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let cache = WorkCache::from_config(&config, executor.clone());
        let workload = Arc::new(workload);

        let driver = async move {
            let concurrency = workload.concurrency;
            let counters = Arc::new(Counters::default());
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let cache = cache.clone();
                        let workload = Arc::clone(&workload);
                        let counters = Arc::clone(&counters);
                        let task_durations = Arc::clone(&task_durations);
                        let task_start = Instant::now();

                        tokio::spawn(async move {
                            process_request(&cache, &workload, &counters).await;

                            task_durations
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            // superseded work may still be winding down
            let drain_timeout = workload.work_duration + Duration::from_secs(1);
            if let Err(err) = wait_until(|| cache.is_empty(), drain_timeout, poll_interval).await {
                tracing::warn!(entries = cache.len(), "cache did not drain: {err}");
            }

            let task_durations: DDSketch = {
                let mut task_durations = task_durations
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *task_durations)
            };

            (concurrency, counters, task_durations)
        };

        let task = executor
            .spawn_scheduled_timeout(driver, config.scheduling_timeout)
            .await
            .context("failed to start workload")?;
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, counters, task_durations) = task.context("workload task panicked")?;

        let ops = task_durations.count();
        let ops_ps = ops as f64 / duration.as_secs_f64();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

        let executions = counters.executions();
        let dedup = if executions > 0 {
            ops as f64 / executions as f64
        } else {
            0.0
        };
        println!(
            "  executions: {executions}; failures: {}; cancellations: {}; dedup ratio: {dedup:.2}",
            counters.failures(),
            counters.cancellations(),
        );

        if ops == 0 {
            continue;
        }
        let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
        let p50 = quantile(&task_durations, 0.5);
        let p90 = quantile(&task_durations, 0.9);
        let p99 = quantile(&task_durations, 0.99);
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    Ok(())
}

fn quantile(sketch: &DDSketch, q: f64) -> Duration {
    let secs = sketch.quantile(q).ok().flatten().unwrap_or_default();
    Duration::from_secs_f64(secs)
}
