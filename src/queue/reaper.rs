//! Periodic sweep that times out tasks stuck in processing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::queue::TaskQueue;

/// Default interval between sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs `cleanup_expired_tasks` on a fixed interval, independent of any worker.
///
/// Every `purge_every` sweeps it also drops task records past their TTL.
pub struct ExpiredTaskReaper {
    queue: Arc<TaskQueue>,
    interval: Duration,
    purge_every: u32,
}

impl ExpiredTaskReaper {
    pub fn new(queue: Arc<TaskQueue>, interval: Duration) -> Self {
        Self {
            queue,
            interval,
            purge_every: 60,
        }
    }

    pub fn with_purge_every(mut self, sweeps: u32) -> Self {
        self.purge_every = sweeps.max(1);
        self
    }

    /// One sweep. Store errors are logged and the sweep is skipped.
    pub async fn sweep(&self, tick: u64) -> usize {
        let reaped = match self.queue.cleanup_expired_tasks().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Expired task sweep failed");
                0
            }
        };

        if tick % u64::from(self.purge_every) == 0
            && let Err(e) = self.queue.purge_expired_records().await
        {
            warn!(error = %e, "Task record purge failed");
        }

        reaped
    }

    /// Spawn the sweep loop. It exits once `shutdown` flips to true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "Reaper started");
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tick += 1;
                        self.sweep(tick).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Reaper stopped");
        })
    }
}
