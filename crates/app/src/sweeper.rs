//! Periodic cancellation of rooms that never started

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use focusroom_core::SessionService;

use crate::config::SweeperConfig;

/// Run one sweep on a blocking thread; returns how many rooms were cancelled
pub async fn sweep_once(service: &Arc<SessionService>, stale_after: chrono::Duration) -> usize {
    let service = service.clone();
    match tokio::task::spawn_blocking(move || service.cancel_stale_sessions(stale_after)).await {
        Ok(Ok(cancelled)) => {
            for id in &cancelled {
                debug!(session_id = %id, "Stale session cancelled");
            }
            cancelled.len()
        }
        Ok(Err(e)) => {
            error!(error = %e, "Stale session sweep failed");
            0
        }
        Err(e) => {
            error!(error = %e, "Stale session sweep panicked");
            0
        }
    }
}

/// Start the sweeper; it stops when `shutdown_rx` fires
pub fn spawn(
    service: Arc<SessionService>,
    config: &SweeperConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let period = Duration::from_secs(config.interval_secs);
    let stale_after = config.stale_after();

    info!(
        interval_secs = config.interval_secs,
        stale_after_minutes = config.stale_after_minutes,
        "Sweeper started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cancelled = sweep_once(&service, stale_after).await;
                    if cancelled > 0 {
                        info!(cancelled, "Sweep finished");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Sweeper shutting down");
                    break;
                }
            }
        }
    })
}
