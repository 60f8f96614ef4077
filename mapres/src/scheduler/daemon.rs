//! Scheduler daemon.
//!
//! A long-running task on the manager's runtime that waits for active-zone
//! updates and runs one scheduling pass per update.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SchedulerDaemon                        │
//! │                                                              │
//! │  set_active_zone ──► watch<ZoneUpdate> ──► latest zone only  │
//! │                                                │             │
//! │                                                ▼             │
//! │                                  ┌───────────────────────┐   │
//! │                                  │ cleanup_junk          │   │
//! │                                  │ request_needed ───────┼──►│ FetchPool
//! │                                  └───────────┬───────────┘   │
//! │                                              ▼               │
//! │                                   Activity::pass_completed   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bursts of updates collapse: the daemon always picks up the most recent zone
//! and skips the ones it never got to.

use super::pool::Activity;
use super::RequestScheduler;
use crate::tile::ActiveZone;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Active zone plus the sequence number of the update that produced it.
#[derive(Debug, Clone, Default)]
pub struct ZoneUpdate {
    pub zone: Arc<ActiveZone>,
    pub generation: u64,
}

/// Background driver of the [`RequestScheduler`].
pub struct SchedulerDaemon {
    scheduler: Arc<RequestScheduler>,
    zones: watch::Receiver<ZoneUpdate>,
    activity: Arc<Activity>,
}

impl SchedulerDaemon {
    pub fn new(
        scheduler: Arc<RequestScheduler>,
        zones: watch::Receiver<ZoneUpdate>,
        activity: Arc<Activity>,
    ) -> Self {
        Self {
            scheduler,
            zones,
            activity,
        }
    }

    /// Run until `shutdown` fires or the zone sender is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Scheduler daemon started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Scheduler daemon shutting down");
                    break;
                }

                changed = self.zones.changed() => {
                    if changed.is_err() {
                        debug!("Zone sender dropped, stopping scheduler daemon");
                        break;
                    }
                }
            }

            let update = self.zones.borrow_and_update().clone();
            let scheduler = Arc::clone(&self.scheduler);
            let zone = Arc::clone(&update.zone);

            match tokio::task::spawn_blocking(move || scheduler.update_resources(&zone)).await {
                Ok(report) => debug!(
                    generation = update.generation,
                    tiles = update.zone.len(),
                    zoom = %update.zone.zoom(),
                    unload_marked = report.unload_marked,
                    removed = report.removed,
                    requested = report.requested,
                    "Scheduling pass complete"
                ),
                Err(e) => error!(
                    generation = update.generation,
                    error = %e,
                    "Scheduling pass did not complete"
                ),
            }

            self.activity.pass_completed(update.generation);
        }
    }
}
