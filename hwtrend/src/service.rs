//! Read-side service behind the HTTP API.
//!
//! Every listing rescans the data directory, so series created by the ingest
//! process show up without a restart. Nothing here fails on bad input: range
//! requests with unparsable parameters log a warning and return no points.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::chart_state::ChartState;
use crate::classify::{TypeIndex, TypeRules};
use crate::error::Result;
use crate::key::{device_label_for_key, short_name_for_key};
use crate::query::FetchRequest;
use crate::store::StoreReader;
use crate::timespec::{TimeSpec, now_secs, parse_duration};

/// Upper bound (up to one extra row for an unaligned start) on the points a
/// range request returns without an explicit resolution.
pub const MAX_CHART_POINTS: u64 = 1200;

/// One entry of [`QueryService::types`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeSummary {
    /// Type identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Display unit, if configured.
    pub unit: Option<String>,
    /// Suggested axis minimum.
    pub min: Option<f64>,
    /// Suggested axis maximum.
    pub max: Option<f64>,
    /// Number of series currently classified as this type.
    pub count: usize,
}

/// One entry of [`QueryService::sensors_by_type`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorInfo {
    /// Series key.
    pub id: String,
    /// Label of the device the sensor belongs to.
    #[serde(rename = "device")]
    pub device_label: String,
    /// Sensor label without device prefix and metric leaf.
    #[serde(rename = "name")]
    pub short_name: String,
}

/// Type listings, range data and chart state over a data directory.
#[derive(Debug)]
pub struct QueryService {
    reader: StoreReader,
    rules: TypeRules,
    chart_state: ChartState,
}

impl QueryService {
    /// Creates a service over a data directory reader.
    pub fn new(reader: StoreReader, rules: TypeRules, chart_state: ChartState) -> Self {
        Self {
            reader,
            rules,
            chart_state,
        }
    }

    /// The underlying store reader.
    pub fn reader(&self) -> &StoreReader {
        &self.reader
    }

    fn index(&self) -> TypeIndex {
        let keys = self.reader.series_keys().unwrap_or_else(|e| {
            error!(error = %e, "failed to scan data directory");
            Vec::new()
        });
        self.rules.group(keys)
    }

    /// Every configured type in declaration order, with its member count.
    pub fn types(&self) -> Vec<TypeSummary> {
        let index = self.index();
        self.rules
            .rules()
            .iter()
            .map(|rule| TypeSummary {
                id: rule.name.clone(),
                title: rule.title.clone(),
                unit: rule.unit.clone(),
                min: rule.min,
                max: rule.max,
                count: index.count(&rule.name),
            })
            .collect()
    }

    /// Sensors of one type sorted by key, `None` if the type is not
    /// configured.
    pub fn sensors_by_type(&self, type_name: &str) -> Option<Vec<SensorInfo>> {
        let index = self.index();
        let members = index.members(type_name)?;

        Some(
            members
                .iter()
                .map(|key| SensorInfo {
                    id: key.clone(),
                    device_label: device_label_for_key(key),
                    short_name: short_name_for_key(key),
                })
                .collect(),
        )
    }

    /// Known `(timestamp_ms, value)` points of `key` relative to the current
    /// time. See [`QueryService::range_data_at`].
    pub fn range_data(
        &self,
        key: &str,
        start: Option<&str>,
        end: Option<&str>,
        resolution: Option<&str>,
    ) -> Vec<(u64, f64)> {
        self.range_data_at(key, start, end, resolution, now_secs())
    }

    /// Known `(timestamp_ms, value)` points of `key`, resolving relative
    /// times against `now`.
    ///
    /// `start` defaults to `end-1h` and `end` to `now`. With a `resolution`
    /// the coarsest band no coarser than it is read. Without one, the finest
    /// band that keeps the answer within [`MAX_CHART_POINTS`] is read.
    /// Unknown rows are left out.
    pub fn range_data_at(
        &self,
        key: &str,
        start: Option<&str>,
        end: Option<&str>,
        resolution: Option<&str>,
        now: u64,
    ) -> Vec<(u64, f64)> {
        match build_request(start, end, resolution) {
            Ok(request) => {
                let points = self.reader.fetch_at(key, &request, now).known_points();
                debug!(key, points = points.len(), "range data");
                points
            }
            Err(e) => {
                warn!(key, error = %e, "invalid range request");
                Vec::new()
            }
        }
    }

    /// The current chart state document.
    pub fn chart_state(&self) -> Value {
        self.chart_state.get()
    }

    /// Replaces the chart state document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChartStateError`] if it cannot be saved.
    pub fn update_chart_state(&self, value: Value) -> Result<()> {
        self.chart_state.replace(value)
    }
}

fn build_request(start: Option<&str>, end: Option<&str>, resolution: Option<&str>) -> Result<FetchRequest> {
    let start = start.map_or_else(|| Ok(TimeSpec::default_start()), str::parse)?;
    let end = end.map_or(Ok(TimeSpec::NOW), str::parse)?;

    let request = FetchRequest::new(start, end);
    Ok(match resolution {
        Some(raw) => request.with_resolution(parse_duration(raw)?),
        None => request.with_max_points(MAX_CHART_POINTS),
    })
}
