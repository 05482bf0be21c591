//! Bounded exponential-backoff retry primitive.
//!
//! Used by the prefetch workers and the hash-pivot fetch path. The schedule
//! doubles from [`INITIAL_DELAY`] up to [`MAX_DELAY`]; each attempt's own
//! timeout is the caller's concern (the client pool bounds every attempt).

use crate::shutdown::Shutdown;
use std::{future::Future, time::Duration};
use tracing::warn;

const INITIAL_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Invokes `op` until it succeeds, up to `max_attempts` times, sleeping an
/// exponentially growing delay between attempts.
///
/// Returns the last error when the budget is exhausted or when `shutdown` is
/// observed between attempts. `max_attempts` of `u64::MAX` is effectively
/// unlimited.
pub async fn retry<V, E, F, Fut>(
    max_attempts: u64,
    shutdown: &Shutdown,
    mut op: F,
) -> Result<V, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt: u64 = 0;

    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(err);
                }
                if shutdown.is_terminating() {
                    return Err(err);
                }

                warn!(attempt, %err, delay_ms = delay.as_millis() as u64, "retrying after error");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);

                if shutdown.is_terminating() {
                    return Err(err);
                }
            }
        }
    }
}
