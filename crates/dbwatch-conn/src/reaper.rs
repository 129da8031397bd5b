//! Idle reaper: background task that periodically closes unused connections.
//!
//! Runs `ConnectionManager::close_unused` on a fixed interval until the
//! manager is shut down. Sweep errors are logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::manager::ConnectionManager;

/// How often the reaper sweeps, independent of the keep-alive period.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Handle to a running reaper task.
#[derive(Debug)]
pub struct IdleReaper {
    handle: JoinHandle<()>,
}

impl IdleReaper {
    /// Spawn a reaper sweeping every [`SWEEP_INTERVAL`].
    pub fn spawn(manager: Arc<ConnectionManager>) -> Self {
        Self::spawn_with_interval(manager, SWEEP_INTERVAL)
    }

    pub fn spawn_with_interval(manager: Arc<ConnectionManager>, interval: Duration) -> Self {
        let shutdown = manager.shutdown_signal();
        let handle = tokio::spawn(async move {
            run_reaper_loop(manager, interval, shutdown).await;
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit. Call after `ConnectionManager::shutdown`.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "idle reaper task failed");
        }
    }
}

async fn run_reaper_loop(
    manager: Arc<ConnectionManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(interval = ?interval, "idle reaper starting");

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = manager.close_unused().await {
                    error!(error = %e, "error occurred while closing unused connection");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("idle reaper shutting down");
}
