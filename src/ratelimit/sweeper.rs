//! Background task that drops expired windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::backend::RateLimitBackend;

/// Default sweep interval (five minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Spawn a task that calls [`RateLimitBackend::sweep`] every `interval`.
///
/// The task exits when `shutdown` changes or its sender is dropped.
pub fn spawn_sweeper<B>(
    backend: Arc<B>,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) -> JoinHandle<()>
where
    B: RateLimitBackend + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; there is nothing to sweep yet.
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "Rate limit sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Rate limit sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = backend.sweep().await;
                    debug!(removed = removed, "Periodic sweep complete");
                }
            }
        }
    })
}
