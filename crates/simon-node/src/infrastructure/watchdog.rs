//! Wall-clock watchdog for blocking bus work.
//!
//! Sessions on the bus have no timeout of their own: a sender keeps
//! retransmitting and a receiver keeps listening for as long as it takes.
//! The watchdog runs such work on Tokio's blocking pool and, once the budget
//! is spent, closes the simulated bus.  Every node blocked on a line
//! operation then gets `SimError::Closed` and unwinds through its normal
//! error path, so the job always finishes before the watchdog returns.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use simon_core::line::sim::SimBus;

/// Why a supervised job did not produce its result.
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("watchdog expired after {0:?}, bus closed")]
    Expired(Duration),

    #[error("supervised job failed to complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs `job` on the blocking pool and closes `bus` if it outlives `budget`.
///
/// # Errors
///
/// - [`WatchdogError::Expired`] when the budget ran out.  The job has already
///   returned by then; its own result is discarded.
/// - [`WatchdogError::Join`] when the job panicked.
pub async fn run_with_watchdog<T, F>(bus: SimBus, budget: Duration, job: F) -> Result<T, WatchdogError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(job);

    match tokio::time::timeout(budget, &mut handle).await {
        Ok(joined) => Ok(joined?),
        Err(_) => {
            warn!(?budget, virtual_us = bus.now(), "watchdog expired, closing bus");
            bus.close();
            // Wait for the job to observe the closed bus and unwind.
            if let Err(error) = handle.await {
                warn!(%error, "supervised job failed after the bus was closed");
            }
            Err(WatchdogError::Expired(budget))
        }
    }
}
