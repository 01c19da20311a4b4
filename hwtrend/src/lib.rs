//! # hwtrend
//!
//! Hardware sensor logger backed by multi-resolution round-robin archives.
//!
//! hwtrend periodically samples a sensor collaborator (by default
//! `sensors -j`), stores every reading in a per-sensor archive file that keeps
//! several resolutions for several retention spans, and answers range queries
//! at the resolution that best fits the requested window.
//!
//! ## Key Properties
//!
//! - Fixed-size archive files: size is determined by the schema, not by uptime
//! - Consolidation (AVERAGE, MIN, MAX) happens at write time
//! - Gaps stay gaps: missed samples become unknown rows, never interpolated
//! - One writer and any number of readers, coordinated by per-file locks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use hwtrend::{ArchiveSchema, FetchRequest, Store, StoreOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::open("./rrd", ArchiveSchema::sensor_default(), StoreOptions::default())?;
//!
//! let key = "coretemp-isa-0000_Package_id_0_temp1_input";
//! store.ingest_at(key, 45.0, 1_700_000_010)?;
//! store.ingest_at(key, 47.5, 1_700_000_040)?;
//!
//! let request = FetchRequest::between(1_700_000_010, 1_700_000_070).with_resolution(Duration::from_secs(30));
//! for sample in store.fetch_at(key, &request, 1_700_000_070) {
//!     println!("{} {:?}", sample.timestamp_ms, sample.value);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`] / [`StoreReader`]: writer and reader over a data directory
//! - [`ArchiveSchema`]: tiers, consolidation functions and xff of new archives
//! - [`IngestLoop`]: periodic sampling from a [`SampleSource`]
//! - [`QueryService`]: type listings, range data and chart state
//!
//! ## Modules
//!
//! - [`archive`]: archive file format, locking and header state
//! - [`ring`]: per-band row storage inside an archive
//! - [`consolidate`]: primary windows and band consolidation
//! - [`query`]: fetch requests, band selection and results
//! - [`timespec`]: `now-1h` style time expressions
//! - [`key`] / [`classify`]: series keys, labels and sensor types
//! - [`snapshot`] / [`source`]: sensor snapshots and where they come from
//! - [`error`]: error types

pub mod archive;
pub mod chart_state;
pub mod classify;
pub mod consolidate;
pub mod error;
pub mod ingest;
pub mod key;
pub mod query;
pub mod ring;
pub mod schema;
pub mod service;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod timespec;

// Re-export primary API types at crate root for convenience.
pub use chart_state::ChartState;
pub use classify::TypeRules;
pub use error::{HwtrendError, Result};
pub use ingest::IngestLoop;
pub use query::{FetchRequest, FetchResult, Sample};
pub use schema::{ArchiveSchema, ConsolidationFn, TierConfig};
pub use service::QueryService;
pub use snapshot::Snapshot;
pub use source::{SampleSource, SensorsCommand};
pub use store::{Store, StoreOptions, StoreReader};
pub use timespec::TimeSpec;
