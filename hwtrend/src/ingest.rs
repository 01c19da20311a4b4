//! The periodic ingest loop.
//!
//! Each cycle takes one snapshot from a [`SampleSource`], walks its leaves and
//! ingests every reading under one shared cycle timestamp. A failed snapshot
//! skips the cycle; a failed series is logged and counted and never stops the
//! walk or the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::{HwtrendError, Result};
use crate::key::derive;
use crate::source::SampleSource;
use crate::store::Store;
use crate::timespec::now_secs;

/// Default time between cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Readings stored.
    pub ingested: usize,
    /// Readings refused as out of order.
    pub rejected: usize,
    /// Readings lost to archive or key errors.
    pub failed: usize,
}

/// Single-threaded sampling loop feeding a [`Store`].
#[derive(Debug)]
pub struct IngestLoop<S> {
    store: Store,
    source: S,
    interval: Duration,
}

impl<S: SampleSource> IngestLoop<S> {
    /// Creates a loop that samples `source` every `interval`.
    pub fn new(store: Store, source: S, interval: Duration) -> Self {
        Self {
            store,
            source,
            interval,
        }
    }

    /// The store being fed.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs one cycle stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns the [`crate::error::CollectorError`] if no snapshot could be
    /// taken; the cycle is skipped.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        self.run_cycle_at(now_secs())
    }

    /// Runs one cycle stamped with `timestamp` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns the [`crate::error::CollectorError`] if no snapshot could be
    /// taken; the cycle is skipped.
    pub fn run_cycle_at(&mut self, timestamp: u64) -> Result<CycleReport> {
        let snapshot = match self.source.sample() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "skipping cycle, no snapshot");
                return Err(e);
            }
        };

        let mut report = CycleReport::default();
        let store = &mut self.store;

        snapshot.walk(|path, value| {
            let derived = derive(path);
            let outcome = store
                .ensure_series(&derived.key)
                .and_then(|archive| archive.update(&derived.key, timestamp, value));

            match outcome {
                Ok(()) => report.ingested += 1,
                Err(e @ HwtrendError::Ingest(_)) => {
                    warn!(key = %derived.key, error = %e, "rejected reading");
                    report.rejected += 1;
                }
                Err(e) => {
                    error!(key = %derived.key, error = %e, "failed to store reading");
                    report.failed += 1;
                }
            }
        });

        // Failures are logged per archive by the store.
        let _ = self.store.sync();

        debug!(
            timestamp,
            ingested = report.ingested,
            rejected = report.rejected,
            failed = report.failed,
            "cycle complete"
        );
        Ok(report)
    }

    /// Runs cycles every interval until `stop` is set.
    ///
    /// Cycles never overlap: a cycle that overruns the interval is followed
    /// immediately by the next one.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        info!(interval = ?self.interval, "ingest loop started");

        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            // Errors are logged and counted inside the cycle.
            let _ = self.run_cycle();

            let remaining = self.interval.saturating_sub(started.elapsed());
            if !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
                thread::sleep(remaining);
            }
        }

        info!("ingest loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::CollectorError;
    use crate::query::FetchRequest;
    use crate::schema::ArchiveSchema;
    use crate::snapshot::Snapshot;
    use crate::store::StoreOptions;

    fn store(dir: &std::path::Path) -> Store {
        Store::open(dir, ArchiveSchema::sensor_default(), StoreOptions::default()).unwrap()
    }

    fn fixed_source(json: &'static str) -> impl FnMut() -> Result<Snapshot> {
        move || Snapshot::parse(json)
    }

    const SNAPSHOT: &str = r#"{
        "coretemp-isa-0000": {
            "Adapter": "ISA adapter",
            "Package id 0": { "temp1_input": 45.0 },
            "Core 0": { "temp2_input": 43.0 }
        },
        "nct6775-isa-0290": { "fan1": { "fan1_input": 1200 } }
    }"#;

    #[test]
    fn test_cycle_ingests_every_leaf() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut ingest = IngestLoop::new(store(temp_dir.path()), fixed_source(SNAPSHOT), DEFAULT_INTERVAL);

        let report = ingest.run_cycle_at(1_000).unwrap();
        assert_eq!(report, CycleReport { ingested: 3, rejected: 0, failed: 0 });

        assert_eq!(
            ingest.store().series_keys().unwrap(),
            vec![
                "coretemp-isa-0000_Core_0_temp2_input".to_string(),
                "coretemp-isa-0000_Package_id_0_temp1_input".to_string(),
                "nct6775-isa-0290_fan1_fan1_input".to_string(),
            ]
        );
    }

    #[test]
    fn test_out_of_order_cycle_is_rejected_per_series() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut ingest = IngestLoop::new(store(temp_dir.path()), fixed_source(SNAPSHOT), DEFAULT_INTERVAL);

        ingest.run_cycle_at(1_000).unwrap();
        let report = ingest.run_cycle_at(990).unwrap();
        assert_eq!(report, CycleReport { ingested: 0, rejected: 3, failed: 0 });

        let report = ingest.run_cycle_at(1_005).unwrap();
        assert_eq!(report.ingested, 3);
    }

    #[test]
    fn test_collector_error_skips_cycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let failing = || -> Result<Snapshot> {
            Err(CollectorError::UnexpectedShape {
                reason: "test".to_string(),
            }
            .into())
        };
        let mut ingest = IngestLoop::new(store(temp_dir.path()), failing, DEFAULT_INTERVAL);

        assert!(ingest.run_cycle_at(1_000).is_err());
        assert!(ingest.store().series_keys().unwrap().is_empty());
    }

    #[test]
    fn test_cycles_feed_fetch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut ingest = IngestLoop::new(store(temp_dir.path()), fixed_source(SNAPSHOT), DEFAULT_INTERVAL);

        for t in (0..120).step_by(5) {
            ingest.run_cycle_at(1_700_000_000 + t).unwrap();
        }

        let request = FetchRequest::between(1_700_000_000 - 30, 1_700_000_120)
            .with_resolution(Duration::from_secs(30));
        let points = ingest
            .store()
            .fetch_at("nct6775-isa-0290_fan1_fan1_input", &request, 1_700_000_120)
            .known_points();
        assert!(!points.is_empty());
        assert!(points.iter().all(|&(_, v)| (v - 1200.0).abs() < 1e-9));
    }

    #[test]
    fn test_run_until_stops() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let mut cycles = 0;
        let stopper = Arc::clone(&stop);
        let source = move || {
            cycles += 1;
            if cycles >= 3 {
                stopper.store(true, Ordering::Relaxed);
            }
            Snapshot::parse(SNAPSHOT)
        };

        let mut ingest = IngestLoop::new(store(temp_dir.path()), source, Duration::from_millis(1));
        ingest.run_until(&stop);

        assert!(stop.load(Ordering::Relaxed));
        assert_eq!(ingest.store().series_keys().unwrap().len(), 3);
    }
}
