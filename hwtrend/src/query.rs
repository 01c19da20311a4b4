//! Fetch requests, band selection and fetch results.
//!
//! A fetch reads one band of an archive. Among the bands that keep the
//! requested consolidation function, a band *covers* a request if the start
//! lies within its span behind the band head:
//!
//! ```text
//!            span = step * capacity
//!   |<------------------------------->|
//! head-span                          head (pending row)
//! ```
//!
//! Without a resolution hint the coarsest covering band is read, which bounds
//! the number of points. With a hint, the coarsest covering band that is still
//! at least as fine as the hint is read, falling back to the finest covering
//! band. With a point budget instead, the finest covering band whose step
//! keeps the range within the budget is read, falling back to the coarsest
//! covering band. If no band covers the start, the band with the longest span
//! is read and the result is flagged as incomplete.
//!
//! The output grid holds one [`Sample`] per band step from the aligned start up
//! to (excluding) the end, clamped to `[head - span, head]`. Unknown rows stay
//! in the grid as gaps.

use std::time::Duration;

use serde::Serialize;

use crate::archive::ArchiveView;
use crate::consolidate::{BandState, align_down};
use crate::schema::ConsolidationFn;
use crate::timespec::TimeSpec;

/// Parameters of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Start of the range, default `end-1h`.
    pub start: TimeSpec,
    /// End of the range (exclusive), default `now`.
    pub end: TimeSpec,
    /// Which band family to read, default AVERAGE.
    pub consolidation_fn: ConsolidationFn,
    /// Preferred maximum step between samples.
    pub resolution: Option<Duration>,
    /// Preferred maximum number of samples, used when `resolution` is unset.
    pub max_points: Option<u64>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            start: TimeSpec::default_start(),
            end: TimeSpec::NOW,
            consolidation_fn: ConsolidationFn::Average,
            resolution: None,
            max_points: None,
        }
    }
}

impl FetchRequest {
    /// Request for the range between two expressions.
    pub fn new(start: TimeSpec, end: TimeSpec) -> Self {
        Self {
            start,
            end,
            ..Self::default()
        }
    }

    /// Request for the absolute range `[start, end)` in Unix seconds.
    pub fn between(start: u64, end: u64) -> Self {
        Self::new(TimeSpec::at(start), TimeSpec::at(end))
    }

    /// Reads bands of `consolidation_fn` instead of AVERAGE.
    #[must_use]
    pub fn with_consolidation_fn(mut self, consolidation_fn: ConsolidationFn) -> Self {
        self.consolidation_fn = consolidation_fn;
        self
    }

    /// Prefers bands with a step no coarser than `resolution`.
    #[must_use]
    pub fn with_resolution(mut self, resolution: Duration) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Prefers the finest band that answers with at most about `max_points`
    /// samples. Ignored when a resolution is set.
    #[must_use]
    pub fn with_max_points(mut self, max_points: u64) -> Self {
        self.max_points = Some(max_points.max(1));
        self
    }

    /// How to pick among covering bands for the range `[start, end)`.
    pub(crate) fn step_preference(&self, start: u64, end: u64) -> StepPreference {
        match (self.resolution, self.max_points) {
            (Some(resolution), _) => StepPreference::AtMost(resolution.as_secs().max(1)),
            (None, Some(max_points)) => StepPreference::AtLeast(end.saturating_sub(start).div_ceil(max_points).max(1)),
            (None, None) => StepPreference::Coarsest,
        }
    }
}

/// Rule for choosing among the bands that cover a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPreference {
    /// The coarsest covering band.
    Coarsest,
    /// The coarsest covering band with `step <= n`, else the finest covering band.
    AtMost(u64),
    /// The finest covering band with `step >= n`, else the coarsest covering band.
    AtLeast(u64),
}

/// One point of a fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Start of the row in Unix milliseconds.
    pub timestamp_ms: u64,
    /// Consolidated value, `None` if unknown.
    pub value: Option<f64>,
}

/// Step-spaced samples of one band, with metadata about how they were read.
///
/// # Examples
///
/// ```rust
/// use hwtrend::query::FetchResult;
///
/// let result = FetchResult::empty();
/// assert!(result.is_empty());
/// assert_eq!(result.band_used(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchResult {
    samples: Vec<Sample>,
    step: u64,
    band_used: Option<usize>,
    may_be_incomplete: bool,
}

impl FetchResult {
    /// A result with no samples.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Samples in strictly increasing timestamp order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Consumes the result, returning its samples.
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Seconds between consecutive samples (zero for an empty result).
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Index of the band that was read.
    pub fn band_used(&self) -> Option<usize> {
        self.band_used
    }

    /// True if the requested start lies outside the retained range.
    pub fn may_be_incomplete(&self) -> bool {
        self.may_be_incomplete
    }

    /// Number of samples, known or not.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `(timestamp_ms, value)` of the known samples only.
    pub fn known_points(&self) -> Vec<(u64, f64)> {
        self.samples
            .iter()
            .filter_map(|s| s.value.map(|v| (s.timestamp_ms, v)))
            .collect()
    }
}

impl IntoIterator for FetchResult {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

/// Chooses the band to read for a request starting at `start`.
///
/// Returns the band index and whether the chosen band does not cover the
/// start. `None` if no band keeps `consolidation_fn`.
pub fn select_band(
    bands: &[BandState],
    consolidation_fn: ConsolidationFn,
    start: u64,
    preference: StepPreference,
) -> Option<(usize, bool)> {
    let candidates = || {
        bands
            .iter()
            .enumerate()
            .filter(move |(_, band)| band.consolidation_fn == consolidation_fn)
    };
    let covering =
        || candidates().filter(move |(_, band)| start >= band.pending_start.saturating_sub(band.span()));

    let chosen = match preference {
        StepPreference::Coarsest => covering().max_by_key(|(_, band)| band.step),
        StepPreference::AtMost(step) => covering()
            .filter(|(_, band)| band.step <= step)
            .max_by_key(|(_, band)| band.step)
            .or_else(|| covering().min_by_key(|(_, band)| band.step)),
        StepPreference::AtLeast(step) => covering()
            .filter(|(_, band)| band.step >= step)
            .min_by_key(|(_, band)| band.step)
            .or_else(|| covering().max_by_key(|(_, band)| band.step)),
    };

    match chosen {
        Some((index, _)) => Some((index, false)),
        None => candidates()
            .max_by_key(|(_, band)| band.span())
            .map(|(index, _)| (index, true)),
    }
}

/// Reads `[start, end)` from an archive view.
pub(crate) fn fetch_view(
    view: &ArchiveView<'_>,
    consolidation_fn: ConsolidationFn,
    start: u64,
    end: u64,
    preference: StepPreference,
) -> FetchResult {
    let state = view.state();
    if state.last_update.is_none() {
        return FetchResult::empty();
    }

    let Some((index, uncovered)) = select_band(&state.bands, consolidation_fn, start, preference) else {
        return FetchResult::empty();
    };
    let band = &state.bands[index];
    let head = band.pending_start;
    let oldest = head.saturating_sub(band.span());

    let aligned_start = align_down(start, band.step);
    let mut samples = Vec::new();
    let mut window = aligned_start.max(oldest);
    while window < end && window <= head {
        let value = if window == head {
            band.provisional(&state.primary)
        } else {
            view.row(index, window)
        };
        samples.push(Sample {
            timestamp_ms: window.saturating_mul(1000),
            value,
        });
        window += band.step;
    }

    FetchResult {
        samples,
        step: band.step,
        band_used: Some(index),
        may_be_incomplete: uncovered || aligned_start < oldest,
    }
}
