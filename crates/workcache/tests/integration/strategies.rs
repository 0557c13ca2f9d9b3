use std::time::Duration;

use workcache::config::Config;
use workcache::{CacheKey, CacheStrategy, TaskExecutor, WorkCache, WorkError, wait_until};
use workcache_test::{EventLog, ExecutionCounter, pending_work, setup, value_work};

#[tokio::test]
async fn test_cancel_and_retry() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let log = EventLog::new();
    let key = CacheKey(1);

    let first = cache.handle_with(
        CacheStrategy::CancelAndRetry,
        pending_work::<u32>(&counter).handle_events(
            |_| unreachable!(),
            |_| unreachable!(),
            log.recorder("first cancelled"),
        ),
        key,
    );
    first.start();
    wait_until(
        || counter.get() == 1,
        Duration::from_secs(1),
        Duration::from_millis(1),
    )
    .await
    .unwrap();

    let second = {
        let log = log.clone();
        cache.handle_with(
            CacheStrategy::CancelAndRetry,
            value_work(&counter, 2u32, Duration::from_millis(10)).handle_events(
                move |_| log.push("second done"),
                |_| unreachable!(),
                || unreachable!(),
            ),
            key,
        )
    };
    assert!(!second.ptr_eq(&first));

    assert_eq!(second.run().await, Ok(2));
    assert_eq!(first.observe().await, Err(WorkError::Cancelled));

    assert_eq!(log.events(), ["first cancelled", "second done"]);
    assert_eq!(counter.get(), 2);
}

#[tokio::test]
async fn test_superseded_work_does_not_evict_replacement() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let key = CacheKey(1);

    let first = cache.handle_with(
        CacheStrategy::CancelAndRetry,
        pending_work::<u32>(&counter),
        key,
    );
    first.start();

    let second = cache.handle_with(
        CacheStrategy::CancelAndRetry,
        pending_work::<u32>(&counter),
        key,
    );

    // The first work terminates after it was replaced, and must leave the replacement alone.
    assert_eq!(first.observe().await, Err(WorkError::Cancelled));

    let cached = cache.retrieve::<u32>(key).unwrap();
    assert!(cached.ptr_eq(&second));

    second.cancel();
    assert_eq!(second.observe().await, Err(WorkError::Cancelled));
    assert!(!cache.contains(key));
}

#[tokio::test]
async fn test_cancelled_entry_is_replaced() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let key = CacheKey(9);

    let cancelled = cache.handle(pending_work::<u32>(&counter), key);
    cancelled.start();
    cancelled.cancel();

    let fresh = cache.handle(value_work(&counter, 9u32, Duration::ZERO), key);
    assert!(!fresh.ptr_eq(&cancelled));
    assert_eq!(fresh.run().await, Ok(9));
    assert_eq!(cancelled.observe().await, Err(WorkError::Cancelled));
}

#[tokio::test]
async fn test_default_strategy_from_config() {
    setup();

    let config = Config {
        default_strategy: CacheStrategy::CancelAndRetry,
        ..Config::default()
    };
    let cache = WorkCache::from_config(&config, TaskExecutor::current());
    let counter = ExecutionCounter::new();
    let key = CacheKey(4);

    let first = cache.handle(pending_work::<u32>(&counter), key);
    first.start();
    let second = cache.handle(value_work(&counter, 4u32, Duration::ZERO), key);

    assert_eq!(second.run().await, Ok(4));
    assert_eq!(first.observe().await, Err(WorkError::Cancelled));
}

#[tokio::test]
async fn test_cancel_and_retry_across_output_types() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let log = EventLog::new();
    let key = CacheKey(1);

    let first = cache.handle_with(
        CacheStrategy::CancelAndRetry,
        pending_work::<u32>(&counter).handle_events(
            |_| unreachable!(),
            |_| unreachable!(),
            log.recorder("first cancelled"),
        ),
        key,
    );
    first.start();
    wait_until(
        || counter.get() == 1,
        Duration::from_secs(1),
        Duration::from_millis(1),
    )
    .await
    .unwrap();

    let second = cache.handle_with(
        CacheStrategy::CancelAndRetry,
        value_work(&counter, String::from("retry"), Duration::ZERO),
        key,
    );

    assert_eq!(first.observe().await, Err(WorkError::Cancelled));
    assert_eq!(second.run().await.unwrap(), "retry");
    assert_eq!(log.events(), ["first cancelled"]);
    assert!(cache.is_empty());
}
