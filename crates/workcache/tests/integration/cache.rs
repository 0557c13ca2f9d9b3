use std::time::Duration;

use workcache::{CacheKey, WorkCache, WorkError, wait_until};
use workcache_test::{ExecutionCounter, failing_work, pending_work, setup, value_work};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_are_deduplicated() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let key = CacheKey(42);

    let requests: Vec<_> = (0..2)
        .map(|_| {
            let cache = cache.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let work = value_work(&counter, 7, Duration::from_millis(50));
                let shared = cache.handle(work, key);
                shared.run().await
            })
        })
        .collect();

    for request in requests {
        assert_eq!(request.await.unwrap().unwrap(), 7);
    }

    assert_eq!(counter.get(), 1);
    assert!(!cache.contains(key));
}

#[tokio::test]
async fn test_callers_share_the_error() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let key = CacheKey(3);

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let work = failing_work::<u32>(&counter, "boom", Duration::from_millis(10));
            cache.handle(work, key)
        })
        .collect();

    let results = futures::future::join_all(handles.iter().map(|h| h.run())).await;

    let first = results[0].clone().unwrap_err();
    for result in &results {
        assert_eq!(result.clone().unwrap_err(), first);
    }
    insta::assert_snapshot!(first.to_string(), @"work failed: boom");

    assert_eq!(counter.get(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_reexecutes_after_completion() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let key = CacheKey(42);

    let first = cache.handle(value_work(&counter, 1, Duration::ZERO), key);
    assert_eq!(first.run().await, Ok(1));
    assert!(!cache.contains(key));

    let second = cache.handle(value_work(&counter, 2, Duration::ZERO), key);
    assert!(!second.ptr_eq(&first));
    assert_eq!(second.run().await, Ok(2));

    assert_eq!(counter.get(), 2);
}

#[tokio::test]
async fn test_reexecutes_after_failure() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let key = CacheKey(8);

    let failed = cache.handle(failing_work::<u32>(&counter, "flaky", Duration::ZERO), key);
    assert!(failed.run().await.is_err());

    let retried = cache.handle(value_work(&counter, 8u32, Duration::ZERO), key);
    assert_eq!(retried.run().await, Ok(8));
    assert_eq!(counter.get(), 2);
}

#[tokio::test]
async fn test_cancel_reaches_every_observer() {
    setup();

    let cache = WorkCache::new();
    let counter = ExecutionCounter::new();
    let key = CacheKey(5);

    let first = cache.handle(pending_work::<u32>(&counter), key);
    let second = cache.handle(pending_work::<u32>(&counter), key);
    assert!(first.ptr_eq(&second));

    first.start();
    wait_until(
        || counter.get() == 1,
        Duration::from_secs(1),
        Duration::from_millis(1),
    )
    .await
    .unwrap();

    second.cancel();

    assert_eq!(first.observe().await, Err(WorkError::Cancelled));
    assert_eq!(second.observe().await, Err(WorkError::Cancelled));
    assert!(!cache.contains(key));
    assert_eq!(counter.get(), 1);
}

#[tokio::test]
async fn test_caches_are_independent() {
    setup();

    let counter = ExecutionCounter::new();
    let key = CacheKey(42);

    let a = WorkCache::new().handle(value_work(&counter, 1, Duration::ZERO), key);
    let b = WorkCache::new().handle(value_work(&counter, 2, Duration::ZERO), key);

    assert_eq!(a.run().await, Ok(1));
    assert_eq!(b.run().await, Ok(2));
    assert_eq!(counter.get(), 2);
}
