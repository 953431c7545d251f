//! Convergence poller — bounded retry of an async condition.
//!
//! Waits one interval, evaluates the condition, and repeats until the
//! condition holds or the timeout has elapsed. An error from the condition
//! ends polling immediately; the remaining budget is not spent.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ConvergenceConfig;

/// Why polling stopped without the condition holding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError<E> {
    #[error("condition not met within {waited:?}")]
    TimedOut { waited: Duration },

    #[error("{0}")]
    Predicate(E),
}

/// Poll `condition` every `interval` until it returns `Ok(true)`.
pub async fn poll_until<F, Fut, E>(
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        tokio::time::sleep(interval).await;
        attempts += 1;
        if condition().await.map_err(PollError::Predicate)? {
            debug!(attempts, waited = ?started.elapsed(), "condition met");
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= timeout {
            debug!(attempts, ?waited, "condition not met before timeout");
            return Err(PollError::TimedOut { waited });
        }
    }
}

/// [`poll_until`] with the interval and timeout of a [`ConvergenceConfig`].
pub async fn poll_converged<F, Fut, E>(
    config: &ConvergenceConfig,
    condition: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    poll_until(config.interval, config.timeout, condition).await
}
