//! Error types for the hwtrend sensor store.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all hwtrend operations.
///
/// Most of these are recovered close to where they happen: the ingest loop
/// logs and skips, the query side logs and returns an empty result. Only
/// [`ConfigError`] and [`SchemaError`] are expected to reach `main`.
#[derive(Error, Debug)]
pub enum HwtrendError {
    /// Sensor type rules are missing or invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The sampling collaborator could not produce a snapshot.
    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    /// Error opening the store or resolving a series.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error during an ingest (write path).
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Error during a fetch (read path).
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error during schema validation.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Error reading, writing or locking an archive file.
    #[error("archive I/O error: {0}")]
    Archive(#[from] ArchiveError),

    /// Error persisting the chart state document.
    #[error("chart state error: {0}")]
    ChartState(#[from] ChartStateError),
}

/// Errors in the sensor type classification rules. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The rules file could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        /// The rules file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The rules document is not valid JSON or has the wrong shape.
    #[error("failed to parse type rules: {source}")]
    Parse {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A match pattern is not a valid regular expression.
    #[error("invalid pattern '{pattern}' for type '{type_name}': {source}")]
    InvalidPattern {
        /// The type the pattern belongs to.
        type_name: String,
        /// The offending pattern.
        pattern: String,
        /// The regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// The rules document declares no types at all.
    #[error("no sensor types configured")]
    NoTypes,
}

/// Errors raised by a sample source.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// The sampling command could not be started.
    #[error("failed to run '{command}': {source}")]
    Spawn {
        /// The program that failed to start.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The sampling command exited unsuccessfully.
    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        /// The program that failed.
        command: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The command output is not JSON.
    #[error("malformed sensor output: {source}")]
    Malformed {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The output is JSON but not a mapping of devices.
    #[error("unexpected sensor output shape: {reason}")]
    UnexpectedShape {
        /// What was wrong with the document.
        reason: String,
    },
}

/// Errors that can occur when opening the store or resolving a series.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The data directory could not be created or listed.
    #[error("failed to access data directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No archive exists for the key.
    #[error("unknown series '{key}'")]
    UnknownSeries {
        /// The requested key.
        key: String,
    },

    /// The key is not usable as an archive file name.
    #[error("invalid series key '{key}': {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The archive was created with a different band schema.
    #[error("archive for '{key}' has schema {existing:x}, expected {expected:x}")]
    SchemaMismatch {
        /// The series key.
        key: String,
        /// Hash stored in the archive header.
        existing: u64,
        /// Hash of the configured schema.
        expected: u64,
    },
}

/// Errors that can occur during ingest.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The timestamp is older than the last accepted update.
    #[error("timestamp {timestamp} for '{key}' is older than last update {last_update}")]
    OutOfOrder {
        /// The series key.
        key: String,
        /// The rejected timestamp (Unix seconds).
        timestamp: u64,
        /// The last accepted timestamp (Unix seconds).
        last_update: u64,
    },
}

/// Errors that can occur while resolving a fetch request.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A start/end expression could not be parsed.
    #[error("invalid time specification '{spec}': {reason}")]
    InvalidTimeSpec {
        /// The raw expression.
        spec: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The resolved range is empty or inverted.
    #[error("invalid time range: start {start} >= end {end}")]
    InvalidTimeRange {
        /// Resolved start (Unix seconds).
        start: u64,
        /// Resolved end (Unix seconds).
        end: u64,
    },
}

/// Errors that can occur during schema validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// No tiers are configured.
    #[error("at least one tier must be configured")]
    NoTiers,

    /// No consolidation functions are configured.
    #[error("at least one consolidation function must be configured")]
    NoConsolidationFns,

    /// The same consolidation function is listed twice.
    #[error("consolidation function {0:?} is listed more than once")]
    DuplicateConsolidationFn(crate::schema::ConsolidationFn),

    /// A tier configuration is invalid.
    #[error("invalid tier {tier}: {reason}")]
    InvalidTierConfig {
        /// Index of the offending tier.
        tier: usize,
        /// What makes it invalid.
        reason: String,
    },

    /// Tiers are not ordered by strictly increasing step.
    #[error("tiers must be ordered from finest to coarsest step")]
    TiersNotOrdered,

    /// A tier step is not a whole multiple of the primary step.
    #[error("tier {tier} step {step}s is not a multiple of the primary step {primary_step}s")]
    StepNotMultiple {
        /// Index of the offending tier.
        tier: usize,
        /// Its step in seconds.
        step: u64,
        /// The primary step in seconds.
        primary_step: u64,
    },

    /// The x-files factor is outside `[0, 1)`.
    #[error("xff must be in [0, 1), got {0}")]
    InvalidXff(f64),
}

/// Errors reading, writing or locking an archive file.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Failed to open or read an archive.
    #[error("failed to read archive '{}': {source}", path.display())]
    ReadFailed {
        /// The archive path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or write an archive.
    #[error("failed to write archive '{}': {source}", path.display())]
    WriteFailed {
        /// The archive path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to take or release the archive file lock.
    #[error("failed to lock archive '{}': {source}", path.display())]
    Lock {
        /// The archive path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The archive has an invalid header or length.
    #[error("archive '{}' is corrupted: {reason}", path.display())]
    Corrupted {
        /// The archive path.
        path: PathBuf,
        /// Description of the corruption.
        reason: String,
    },
}

/// Errors persisting the chart state document.
#[derive(Error, Debug)]
pub enum ChartStateError {
    /// Failed to write the document.
    #[error("failed to save chart state to '{}': {source}", path.display())]
    Save {
        /// The state file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the document.
    #[error("failed to serialize chart state: {source}")]
    Serialize {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, HwtrendError>`.
pub type Result<T> = std::result::Result<T, HwtrendError>;
