//! Replays a recorded gateway event log through the synchronizer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use miette::Result;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use chorus_state::{
    CacheSettings, Dispatcher, EventSynchronizerBuilder, Fact, MaintenanceReport,
    PendingMatchers, run_cycle,
};

/// One line of the event log.
#[derive(Debug, Deserialize)]
struct LoggedEvent {
    /// Event type; absent for non-dispatch frames.
    t: Option<String>,
    #[serde(default)]
    d: Value,
}

/// Counts published facts by name.
#[derive(Default)]
struct RecordingDispatcher {
    counts: Mutex<BTreeMap<&'static str, usize>>,
}

impl Dispatcher for RecordingDispatcher {
    fn publish(&self, fact: Fact, pending: &PendingMatchers) {
        pending.resolve(&fact);
        *self.counts.lock().entry(fact.name).or_default() += 1;
    }
}

/// What a replay did.
#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub events: usize,
    pub skipped: usize,
    pub facts: BTreeMap<&'static str, usize>,
    pub stores: Vec<(String, usize)>,
    pub maintenance: Option<MaintenanceReport>,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "events: {} ({} skipped)", self.events, self.skipped)?;
        writeln!(f, "facts:")?;
        for (name, count) in &self.facts {
            writeln!(f, "  {name}: {count}")?;
        }
        writeln!(f, "stores:")?;
        for (name, len) in &self.stores {
            writeln!(f, "  {name}: {len}")?;
        }
        if let Some(report) = &self.maintenance {
            write!(
                f,
                "maintenance: {} evicted, {} pruned",
                report.evicted, report.pruned
            )?;
        }
        Ok(())
    }
}

/// Feed every line of `path` through a fresh synchronizer.
///
/// Lines that are not JSON, or carry no event type, are skipped. With the
/// weak strategy a maintenance task runs during the replay and one final
/// cycle runs before the store sizes are read.
pub async fn run(path: &Path, settings: CacheSettings) -> Result<ReplaySummary> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| miette::miette!("failed to open {}: {}", path.display(), e))?;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (sync, maintenance) = EventSynchronizerBuilder::new(settings)
        .dispatcher(dispatcher.clone())
        .build_with_maintenance(shutdown_rx);

    let mut summary = ReplaySummary::default();
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| miette::miette!("failed to read {}: {}", path.display(), e))?
    {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<LoggedEvent>(&line) {
            Ok(LoggedEvent { t: Some(event_type), d }) => {
                sync.process_event(&event_type, d).await;
                summary.events += 1;
            }
            Ok(_) => {
                debug!(line = line_no, "skipping frame without event type");
                summary.skipped += 1;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping unparseable line");
                summary.skipped += 1;
            }
        }
    }

    if let Some(handle) = maintenance {
        let _ = shutdown_tx.send(true);
        if let Err(e) = handle.await {
            warn!(error = %e, "maintenance task failed");
        }
        summary.maintenance = run_cycle(sync.store().as_ref());
    }

    summary.facts = dispatcher.counts.lock().clone();
    summary.stores = sync.store().store_sizes();
    info!(events = summary.events, skipped = summary.skipped, "replay finished");

    Ok(summary)
}
