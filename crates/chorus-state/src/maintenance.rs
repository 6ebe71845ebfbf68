//! Periodic maintenance driver for bounded stores.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::strategy::StateStore;
use crate::weak::{MaintenancePhase, MaintenanceReport};

/// Run one full maintenance cycle: `Start`, then `Stop`.
pub fn run_cycle(store: &dyn StateStore) -> Option<MaintenanceReport> {
    let report = store.maintain(MaintenancePhase::Start);
    store.maintain(MaintenancePhase::Stop);
    report
}

/// Shortest period the maintenance task will run at.
pub const MIN_MAINTENANCE_PERIOD: Duration = Duration::from_secs(1);

/// Spawn a task that runs a maintenance cycle every `period` until
/// `shutdown` turns true or its sender goes away.
///
/// The first cycle runs one full period after spawning. Periods shorter
/// than [`MIN_MAINTENANCE_PERIOD`] are raised to it.
pub fn spawn_maintenance(
    store: Arc<dyn StateStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = period.max(MIN_MAINTENANCE_PERIOD);
    tokio::spawn(async move {
        info!(period_secs = period.as_secs(), "cache maintenance started");
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = interval.tick() => {
                    match run_cycle(store.as_ref()) {
                        Some(report) if !report.is_empty() => {
                            debug!(evicted = report.evicted, pruned = report.pruned, "maintenance cycle");
                        }
                        _ => {}
                    }
                }
            }
        }

        info!("cache maintenance stopped");
    })
}
