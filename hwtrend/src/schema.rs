//! Band schema configuration for hwtrend archives.
//!
//! A schema is a list of resolution tiers and the consolidation functions kept
//! for each of them. Every `(tier, consolidation function)` pair becomes one
//! band in the archive file. The schema is fixed when an archive is created;
//! its [`ArchiveSchema::stable_hash`] is written into the archive header so a
//! changed schema is detected on open.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Maximum number of rows allowed in a single band.
const MAX_ROWS_PER_BAND: u32 = 10_000_000;

/// One resolution of an archive: how wide a row is and how many rows are kept.
///
/// Tiers are arranged in increasing step order. The first tier is the primary
/// tier: its step is the width of the primary window that raw values are
/// collected into before they are consolidated into every band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TierConfig {
    /// Time covered by one consolidated row.
    pub step: Duration,
    /// Number of rows in the ring buffer.
    pub capacity: u32,
}

impl TierConfig {
    /// Creates a tier from a step and a row count.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidTierConfig`] if the step is not a whole,
    /// non-zero number of seconds or the capacity is zero or too large.
    pub fn new(step: Duration, capacity: u32) -> Result<Self> {
        let tier = Self { step, capacity };
        tier.validate(0)?;
        Ok(tier)
    }

    /// Step in whole seconds.
    pub fn step_secs(&self) -> u64 {
        self.step.as_secs()
    }

    /// Time covered by the full ring buffer (`step * capacity`).
    pub fn span(&self) -> Duration {
        self.step * self.capacity
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.step.is_zero() || self.step.subsec_nanos() != 0 {
            return Err(SchemaError::InvalidTierConfig {
                tier: index,
                reason: format!("step must be a whole, non-zero number of seconds, got {:?}", self.step),
            }
            .into());
        }

        if self.capacity == 0 || self.capacity > MAX_ROWS_PER_BAND {
            return Err(SchemaError::InvalidTierConfig {
                tier: index,
                reason: format!("capacity must be in 1..={MAX_ROWS_PER_BAND}, got {}", self.capacity),
            }
            .into());
        }

        Ok(())
    }
}

/// Aggregation used to consolidate primary windows into a band row.
///
/// Unknown (missing) windows never take part: they are excluded from the
/// average's denominator and from min/max comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationFn {
    /// Mean of the primary-window averages.
    Average,
    /// Minimum raw value.
    Min,
    /// Maximum raw value.
    Max,
}

impl ConsolidationFn {
    /// Applies this function to a slice of values, ignoring non-finite ones.
    ///
    /// Returns `None` if no finite value is present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hwtrend::schema::ConsolidationFn;
    ///
    /// let values = [1.0, 2.0, f64::NAN, 6.0];
    /// assert_eq!(ConsolidationFn::Average.apply(&values), Some(3.0));
    /// assert_eq!(ConsolidationFn::Min.apply(&values), Some(1.0));
    /// assert_eq!(ConsolidationFn::Max.apply(&values), Some(6.0));
    /// assert_eq!(ConsolidationFn::Max.apply(&[f64::NAN]), None);
    /// ```
    #[allow(clippy::cast_precision_loss)] // Row counts are far below 2^52
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        let mut finite = values.iter().copied().filter(|v| v.is_finite()).peekable();
        finite.peek()?;

        Some(match self {
            Self::Average => {
                let (sum, count) = finite.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                sum / count as f64
            }
            Self::Min => finite.fold(f64::INFINITY, f64::min),
            Self::Max => finite.fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// On-disk code of this function.
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Average => 0,
            Self::Min => 1,
            Self::Max => 2,
        }
    }

    /// Decodes an on-disk code.
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Average),
            1 => Some(Self::Min),
            2 => Some(Self::Max),
            _ => None,
        }
    }

    /// Upper-case name, as rrdtool spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsolidationFn {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "average" | "avg" => Ok(Self::Average),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(format!("unknown consolidation function '{other}'")),
        }
    }
}

/// Configuration of every archive in a store.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use hwtrend::schema::{ArchiveSchema, ConsolidationFn, TierConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = ArchiveSchema::new(
///     vec![
///         // 10s rows for one hour
///         TierConfig::new(Duration::from_secs(10), 360)?,
///         // 1m rows for one day
///         TierConfig::new(Duration::from_secs(60), 1440)?,
///     ],
///     vec![ConsolidationFn::Average, ConsolidationFn::Max],
///     0.5,
/// )?;
/// assert_eq!(schema.bands().count(), 4);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSchema {
    /// Resolution tiers, ordered from finest to coarsest step.
    pub tiers: Vec<TierConfig>,

    /// Consolidation functions kept for every tier.
    pub consolidation_fns: Vec<ConsolidationFn>,

    /// Largest fraction of unknown primary windows a row may contain and
    /// still be stored as known.
    pub xff: f64,
}

impl ArchiveSchema {
    /// Creates and validates a schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the configuration is invalid.
    pub fn new(
        tiers: Vec<TierConfig>,
        consolidation_fns: Vec<ConsolidationFn>,
        xff: f64,
    ) -> Result<Self> {
        let schema = Self {
            tiers,
            consolidation_fns,
            xff,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// The schema used for every sensor archive.
    ///
    /// - 30s rows for 7 days
    /// - 5m rows for 30 days
    /// - 30m rows for 1 year
    /// - 2h rows for 4 years
    ///
    /// Each tier keeps AVERAGE, MIN and MAX, with an x-files factor of 0.5.
    pub fn sensor_default() -> Self {
        let tier = |step: u64, capacity: u32| TierConfig {
            step: Duration::from_secs(step),
            capacity,
        };

        Self {
            tiers: vec![
                tier(30, 20_160),
                tier(300, 8_640),
                tier(1_800, 17_520),
                tier(7_200, 17_520),
            ],
            consolidation_fns: vec![
                ConsolidationFn::Average,
                ConsolidationFn::Min,
                ConsolidationFn::Max,
            ],
            xff: 0.5,
        }
    }

    /// Validates the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(SchemaError::NoTiers.into());
        }

        if self.consolidation_fns.is_empty() {
            return Err(SchemaError::NoConsolidationFns.into());
        }

        for (i, cf) in self.consolidation_fns.iter().enumerate() {
            if self.consolidation_fns[..i].contains(cf) {
                return Err(SchemaError::DuplicateConsolidationFn(*cf).into());
            }
        }

        if !(0.0..1.0).contains(&self.xff) {
            return Err(SchemaError::InvalidXff(self.xff).into());
        }

        for (index, tier) in self.tiers.iter().enumerate() {
            tier.validate(index)?;
        }

        for window in self.tiers.windows(2) {
            if window[0].step >= window[1].step {
                return Err(SchemaError::TiersNotOrdered.into());
            }
        }

        let primary_step = self.primary_step_secs();
        for (index, tier) in self.tiers.iter().enumerate() {
            if tier.step_secs() % primary_step != 0 {
                return Err(SchemaError::StepNotMultiple {
                    tier: index,
                    step: tier.step_secs(),
                    primary_step,
                }
                .into());
            }
        }

        Ok(())
    }

    /// Width of the primary window in seconds.
    pub fn primary_step_secs(&self) -> u64 {
        self.tiers.first().map_or(0, TierConfig::step_secs)
    }

    /// Iterates the bands in on-disk order: tier-major, then consolidation
    /// function in configuration order.
    pub fn bands(&self) -> impl Iterator<Item = BandSpec> + '_ {
        self.tiers.iter().flat_map(move |tier| {
            self.consolidation_fns.iter().map(move |&consolidation_fn| BandSpec {
                step: tier.step_secs(),
                capacity: tier.capacity,
                consolidation_fn,
            })
        })
    }

    /// Computes a hash of everything that shapes the archive layout.
    ///
    /// FNV-1a over the little-endian encoding of the tiers, consolidation
    /// codes and xff, so the value is the same across builds and platforms.
    pub fn stable_hash(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = OFFSET;
        let mut feed = |bytes: &[u8]| {
            for &b in bytes {
                hash ^= u64::from(b);
                hash = hash.wrapping_mul(PRIME);
            }
        };

        for tier in &self.tiers {
            feed(&tier.step_secs().to_le_bytes());
            feed(&tier.capacity.to_le_bytes());
        }
        for cf in &self.consolidation_fns {
            feed(&[cf.code()]);
        }
        feed(&self.xff.to_bits().to_le_bytes());

        hash
    }
}

/// Shape of one band: a tier step and capacity plus its consolidation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandSpec {
    /// Row width in seconds.
    pub step: u64,
    /// Number of rows.
    pub capacity: u32,
    /// How primary windows are combined into a row.
    pub consolidation_fn: ConsolidationFn,
}

impl BandSpec {
    /// Seconds covered by the full ring buffer.
    pub fn span(&self) -> u64 {
        self.step * u64::from(self.capacity)
    }
}
