//! Polling assertion for asynchronous convergence.
//!
//! Uses `tokio::time`, so it works under `start_paused = true`: each sleep
//! auto-advances the paused clock.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const INITIAL_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_millis(100);

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Backs off from 5 ms, doubling up to 100 ms between polls.
///
/// # Errors
///
/// Returns a message with the number of attempts if the condition never held.
pub async fn assert_eventually<F, Fut>(timeout: Duration, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut delay = INITIAL_DELAY;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if condition().await {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(format!(
                "condition not met after {attempts} attempts in {timeout:?}"
            ));
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}
