use std::time::Duration;

use workcache::{
    BarrierError, CancellableHandle, TimedOut, Work, WorkError, wait_until,
    wait_until_scheduled,
};
use workcache_test::{EventLog, setup};

#[tokio::test]
async fn test_first_instruction_ran() {
    setup();

    let log = EventLog::new();
    let handle = wait_until_scheduled({
        let log = log.clone();
        async move {
            log.push("first instruction");
            tokio::time::sleep(Duration::from_secs(3600)).await;
            log.push("never");
        }
    })
    .await
    .unwrap();

    assert_eq!(log.events(), ["first instruction"]);

    let handle = CancellableHandle::new(handle);
    handle.cancel();
    assert!(!handle.is_armed());
}

#[tokio::test]
async fn test_cancel_reaches_started_work() {
    setup();

    let log = EventLog::new();
    let shared = {
        let started = log.clone();
        Work::from_future(async move {
            started.push("started");
            std::future::pending::<Result<(), WorkError>>().await
        })
        .handle_events(|_| unreachable!(), |_| unreachable!(), log.recorder("cancelled"))
        .share()
    };

    let runner = {
        let shared = shared.clone();
        wait_until_scheduled(async move { shared.run().await })
            .await
            .unwrap()
    };

    // The task is running, so the work itself has been started.
    wait_until(
        || !log.events().is_empty(),
        Duration::from_secs(1),
        Duration::from_millis(1),
    )
    .await
    .unwrap();

    let handle = CancellableHandle::new(shared.clone());
    drop(handle);

    assert_eq!(runner.await.unwrap(), Err(WorkError::Cancelled));
    assert_eq!(log.events(), ["started", "cancelled"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_compare_equal() {
    setup();

    let err = wait_until(|| false, Duration::from_secs(2), Duration::from_millis(100))
        .await
        .unwrap_err();

    assert_eq!(err, TimedOut::new(Duration::from_secs(30)));
    assert_eq!(err, TimedOut::default());
    assert_eq!(err.duration(), Duration::from_secs(2));

    let barrier: BarrierError = err.into();
    assert_eq!(barrier, BarrierError::TimedOut(TimedOut::default()));
}
