use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::error::TimedOut;

/// Waits until `predicate` returns `true`, checking it every `interval`.
///
/// The predicate is checked once right away. Fails with [`TimedOut`] carrying `timeout` when the
/// predicate did not become true within that duration.
pub async fn wait_until<P>(
    mut predicate: P,
    timeout: Duration,
    interval: Duration,
) -> Result<(), TimedOut>
where
    P: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut ticks = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if predicate() {
            return Ok(());
        }

        tokio::select! {
            _ = ticks.tick() => {}
            _ = tokio::time::sleep_until(deadline) => {
                // one last chance, the predicate may have flipped right at the deadline
                return if predicate() { Ok(()) } else { Err(TimedOut::new(timeout)) };
            }
        }
    }
}
