//! Write-time consolidation for hwtrend archives.
//!
//! Raw values are collected into the current *primary window* (one primary
//! step wide). When a value arrives in a later window, the previous window is
//! closed and its summary (average, min, max) is pushed into every band. A band
//! keeps a pending accumulator for its own current step and writes a row once
//! that step has fully elapsed.
//!
//! # Cascade
//!
//! ```text
//! raw values ─► primary window ─┬─► band 0 (30s AVERAGE) ─► row
//!                               ├─► band 1 (30s MIN)     ─► row
//!                               └─► band N (2h MAX)      ─► row
//! ```
//!
//! Elapsed band steps without any data are written as explicit unknown rows,
//! at most `capacity` per band, so a long outage costs O(capacity) work and
//! ring alignment never drifts.
//!
//! [`ArchiveState`] is plain data; the archive file encodes it in its header
//! and band directory, and rows are emitted through a [`RowSink`].

use tracing::trace;

use crate::error::{IngestError, Result};
use crate::schema::{ArchiveSchema, ConsolidationFn};

/// Rounds `timestamp` down to a multiple of `step`.
#[inline]
pub fn align_down(timestamp: u64, step: u64) -> u64 {
    timestamp - timestamp % step
}

/// Summary of one closed primary window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    /// Mean of the raw values in the window.
    pub average: f64,
    /// Smallest raw value.
    pub min: f64,
    /// Largest raw value.
    pub max: f64,
}

/// Running sum/min/max/count over known values.
///
/// The same accumulator serves the primary window (over raw values) and the
/// band pending windows (over primary-window summaries).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulator {
    /// Sum of the accumulated averages (or raw values).
    pub sum: f64,
    /// Smallest accumulated minimum.
    pub min: f64,
    /// Largest accumulated maximum.
    pub max: f64,
    /// Number of known inputs.
    pub count: u32,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }
}

impl Accumulator {
    /// Returns true if nothing known has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Adds one raw value.
    pub fn add_value(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }

    /// Adds the summary of a closed primary window.
    pub fn add(&mut self, summary: &WindowSummary) {
        self.sum += summary.average;
        self.min = self.min.min(summary.min);
        self.max = self.max.max(summary.max);
        self.count += 1;
    }

    /// Summary of everything accumulated so far, `None` if empty.
    #[allow(clippy::cast_precision_loss)] // Counts are far below 2^52
    pub fn summary(&self) -> Option<WindowSummary> {
        if self.is_empty() {
            return None;
        }
        Some(WindowSummary {
            average: self.sum / f64::from(self.count),
            min: self.min,
            max: self.max,
        })
    }

    /// Consolidated value under `cf`, `None` if empty.
    pub fn value(&self, cf: ConsolidationFn) -> Option<f64> {
        let summary = self.summary()?;
        Some(match cf {
            ConsolidationFn::Average => summary.average,
            ConsolidationFn::Min => summary.min,
            ConsolidationFn::Max => summary.max,
        })
    }
}

/// The primary window that is still open.
///
/// The last raw value is kept apart from the rest so that an update with the
/// same timestamp can replace it exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryWindow {
    /// Start of the window (aligned to the primary step).
    pub start: u64,
    /// Accumulator over every raw value except the last one.
    pub base: Accumulator,
    /// Last raw value; `None` if unknown or nothing was ingested yet.
    pub last_value: Option<f64>,
}

impl PrimaryWindow {
    fn new(start: u64) -> Self {
        Self {
            start,
            base: Accumulator::default(),
            last_value: None,
        }
    }

    /// Summary over all raw values of the window, including the last one.
    pub fn summary(&self) -> Option<WindowSummary> {
        let mut all = self.base;
        if let Some(v) = self.last_value {
            all.add_value(v);
        }
        all.summary()
    }

    fn push(&mut self, value: Option<f64>) {
        if let Some(previous) = self.last_value.take() {
            self.base.add_value(previous);
        }
        self.last_value = value;
    }
}

/// Consolidation state of one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandState {
    /// Row width in seconds.
    pub step: u64,
    /// Number of rows in the ring.
    pub capacity: u32,
    /// How primary windows are combined.
    pub consolidation_fn: ConsolidationFn,
    /// Maximum unknown fraction of a stored known row.
    pub xff: f64,
    /// Start of the row currently being accumulated (the band head).
    pub pending_start: u64,
    /// Accumulated primary summaries of the pending row.
    pub pending: Accumulator,
}

impl BandState {
    /// Seconds covered by the full ring.
    pub fn span(&self) -> u64 {
        self.step * u64::from(self.capacity)
    }

    /// Value of the pending row if it were closed now.
    ///
    /// Returns `None` when too few primary windows were known.
    #[allow(clippy::cast_precision_loss)]
    fn close_value(&self, primary_step: u64) -> Option<f64> {
        let expected = (self.step / primary_step) as f64;
        let known = f64::from(self.pending.count);
        if self.pending.is_empty() || (expected - known) / expected > self.xff {
            return None;
        }
        self.pending.value(self.consolidation_fn)
    }

    /// Provisional value of the head row, including the open primary window.
    ///
    /// No x-files factor is applied: the row is still filling up.
    pub fn provisional(&self, primary: &PrimaryWindow) -> Option<f64> {
        let mut acc = self.pending;
        if let Some(summary) = primary.summary() {
            acc.add(&summary);
        }
        acc.value(self.consolidation_fn)
    }

    /// Closes every row whose step ended at or before `until`.
    fn advance(&mut self, band: usize, until: u64, primary_step: u64, sink: &mut impl RowSink) {
        if self.pending_start + self.step > until {
            return;
        }

        let value = self.close_value(primary_step);
        sink.write_row(band, self.pending_start, value);
        self.pending = Accumulator::default();

        let target = align_down(until, self.step);
        let first_gap = (self.pending_start + self.step).max(target.saturating_sub(self.span()));
        let mut start = first_gap;
        while start < target {
            sink.write_row(band, start, None);
            start += self.step;
        }

        self.pending_start = target;
    }
}

/// Destination of rows closed during an update.
pub trait RowSink {
    /// Stores the row of `band` starting at `start`. `None` is an unknown row.
    fn write_row(&mut self, band: usize, start: u64, value: Option<f64>);
}

impl RowSink for Vec<(usize, u64, Option<f64>)> {
    fn write_row(&mut self, band: usize, start: u64, value: Option<f64>) {
        self.push((band, start, value));
    }
}

/// Complete consolidation state of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveState {
    /// Width of a primary window in seconds.
    pub primary_step: u64,
    /// Timestamp of the last accepted update.
    pub last_update: Option<u64>,
    /// The open primary window.
    pub primary: PrimaryWindow,
    /// Per-band state in on-disk order.
    pub bands: Vec<BandState>,
}

impl ArchiveState {
    /// Fresh state for a new archive with the given schema.
    pub fn new(schema: &ArchiveSchema) -> Self {
        Self {
            primary_step: schema.primary_step_secs(),
            last_update: None,
            primary: PrimaryWindow::new(0),
            bands: schema
                .bands()
                .map(|spec| BandState {
                    step: spec.step,
                    capacity: spec.capacity,
                    consolidation_fn: spec.consolidation_fn,
                    xff: schema.xff,
                    pending_start: 0,
                    pending: Accumulator::default(),
                })
                .collect(),
        }
    }

    /// Applies one update.
    ///
    /// Non-finite values are stored as unknown. An update with the same
    /// timestamp as the last one replaces the last raw value.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::OutOfOrder`] if `timestamp` is older than the
    /// last update. The state is left untouched in that case.
    pub fn update(
        &mut self,
        key: &str,
        timestamp: u64,
        value: f64,
        sink: &mut impl RowSink,
    ) -> Result<()> {
        let value = value.is_finite().then_some(value);

        match self.last_update {
            Some(last_update) if timestamp < last_update => {
                return Err(IngestError::OutOfOrder {
                    key: key.to_string(),
                    timestamp,
                    last_update,
                }
                .into());
            }
            Some(last_update) if timestamp == last_update => {
                self.primary.last_value = value;
                return Ok(());
            }
            Some(_) => {}
            None => self.initialize(timestamp),
        }

        let window = align_down(timestamp, self.primary_step);
        if window > self.primary.start {
            self.close_primary(window, sink);
        }

        self.primary.push(value);
        self.last_update = Some(timestamp);
        Ok(())
    }

    fn initialize(&mut self, timestamp: u64) {
        self.primary = PrimaryWindow::new(align_down(timestamp, self.primary_step));
        for band in &mut self.bands {
            band.pending_start = align_down(timestamp, band.step);
        }
    }

    /// Closes the open primary window and moves every band up to `next`.
    fn close_primary(&mut self, next: u64, sink: &mut impl RowSink) {
        let summary = self.primary.summary();
        let closed_end = self.primary.start + self.primary_step;
        trace!(start = self.primary.start, next, known = summary.is_some(), "closing primary window");

        for (i, band) in self.bands.iter_mut().enumerate() {
            if let Some(summary) = &summary {
                band.pending.add(summary);
            }
            band.advance(i, closed_end, self.primary_step, sink);
            band.advance(i, next, self.primary_step, sink);
        }

        self.primary = PrimaryWindow::new(next);
    }
}
