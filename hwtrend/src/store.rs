//! Store module for the hwtrend sensor storage engine.
//!
//! The [`Store`] is the writer side: it owns a data directory, creates one
//! archive per series on first sight and applies updates. The
//! [`StoreReader`] is the read side: it holds nothing open and reads each
//! archive under a shared lock per fetch, so it can live in another thread or
//! process while the writer keeps ingesting.
//!
//! # File Layout
//!
//! ```text
//! data_dir/
//! ├── coretemp-isa-0000_Package_id_0_temp1_input.hwa
//! ├── nct6775-isa-0290_fan1_input.hwa
//! └── ...
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use hwtrend::query::FetchRequest;
//! use hwtrend::schema::ArchiveSchema;
//! use hwtrend::store::{Store, StoreOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::open("./rrd", ArchiveSchema::sensor_default(), StoreOptions::default())?;
//!
//! store.ensure_series("coretemp-isa-0000_Core_0_temp2_input")?;
//! store.ingest_at("coretemp-isa-0000_Core_0_temp2_input", 43.0, 1_700_000_000)?;
//!
//! let result = store.reader().fetch(
//!     "coretemp-isa-0000_Core_0_temp2_input",
//!     &FetchRequest::default(),
//! );
//! for sample in result {
//!     println!("{} {:?}", sample.timestamp_ms, sample.value);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::archive::{ARCHIVE_EXTENSION, Archive, ArchiveInfo, read_archive};
use crate::error::{ArchiveError, HwtrendError, Result, StoreError};
use crate::key::SeriesKey;
use crate::query::{FetchRequest, FetchResult, fetch_view};
use crate::schema::ArchiveSchema;
use crate::timespec::{now_secs, resolve_range};

/// Behaviour switches for a [`Store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Replace an archive that is corrupt or was built with another schema
    /// by a fresh, empty one. When unset such series are skipped.
    pub recreate_corrupt: bool,
}

fn archive_path(dir: &Path, key: &SeriesKey) -> PathBuf {
    dir.join(format!("{key}.{ARCHIVE_EXTENSION}"))
}

/// Writer handle over a directory of per-series archives.
///
/// # Thread Safety
///
/// A `Store` is meant for a single ingest thread. Readers in other threads or
/// processes use a [`StoreReader`].
#[derive(Debug)]
pub struct Store {
    dir: PathBuf,
    schema: ArchiveSchema,
    schema_hash: u64,
    options: StoreOptions,
    archives: HashMap<SeriesKey, Archive>,
}

impl Store {
    /// Opens (creating if needed) the data directory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::SchemaError`] if the schema is invalid and
    /// [`StoreError::DirectoryAccess`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(dir: P, schema: ArchiveSchema, options: StoreOptions) -> Result<Self> {
        schema.validate()?;

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::DirectoryAccess {
            path: dir.clone(),
            source,
        })?;

        info!(
            path = %dir.display(),
            bands = schema.bands().count(),
            recreate_corrupt = options.recreate_corrupt,
            "opened store"
        );

        Ok(Self {
            schema_hash: schema.stable_hash(),
            dir,
            schema,
            options,
            archives: HashMap::new(),
        })
    }

    /// Returns the archive of `key`, creating it with the store schema if it
    /// does not exist yet. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] for a key unusable as a file name,
    /// [`StoreError::SchemaMismatch`] or [`ArchiveError`] if an existing file
    /// cannot be used (and recreation is disabled).
    pub fn ensure_series(&mut self, key: &str) -> Result<&mut Archive> {
        let key = SeriesKey::parse(key)?;

        match self.archives.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let archive = load_or_create(
                    &self.dir,
                    entry.key(),
                    &self.schema,
                    self.schema_hash,
                    self.options,
                )?;
                Ok(entry.insert(archive))
            }
        }
    }

    /// Ingests `value` for `key` at the current time.
    ///
    /// # Errors
    ///
    /// See [`Store::ingest_at`].
    pub fn ingest(&mut self, key: &str, value: f64) -> Result<()> {
        self.ingest_at(key, value, now_secs())
    }

    /// Ingests `value` for `key` at `timestamp` (Unix seconds), creating the
    /// archive if needed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::IngestError::OutOfOrder`] if `timestamp` is
    /// older than the last update of the series, and the errors of
    /// [`Store::ensure_series`].
    pub fn ingest_at(&mut self, key: &str, value: f64, timestamp: u64) -> Result<()> {
        let archive = self.ensure_series(key)?;
        archive.update(key, timestamp, value)
    }

    /// Fetches from `key` relative to the current time.
    ///
    /// Never fails: problems are logged and yield an empty result.
    pub fn fetch(&self, key: &str, request: &FetchRequest) -> FetchResult {
        self.reader().fetch(key, request)
    }

    /// Fetches from `key`, resolving relative times against `now`.
    pub fn fetch_at(&self, key: &str, request: &FetchRequest, now: u64) -> FetchResult {
        self.reader().fetch_at(key, request, now)
    }

    /// Keys of all archives in the data directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DirectoryAccess`] if the directory cannot be read.
    pub fn series_keys(&self) -> Result<Vec<String>> {
        self.reader().series_keys()
    }

    /// Starts flushing every open archive to disk.
    ///
    /// All archives are attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::WriteFailed`] if a flush could not be started.
    pub fn sync(&self) -> Result<()> {
        let mut first_error = None;
        for (key, archive) in &self.archives {
            if let Err(e) = archive.sync() {
                error!(key = %key, error = %e, "failed to sync archive");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// A read-only handle over the same directory.
    pub fn reader(&self) -> StoreReader {
        StoreReader::new(&self.dir)
    }

    /// The data directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// The schema new archives are created with.
    pub fn schema(&self) -> &ArchiveSchema {
        &self.schema
    }

    /// Number of archives currently held open.
    pub fn open_series_count(&self) -> usize {
        self.archives.len()
    }
}

fn load_or_create(
    dir: &Path,
    key: &SeriesKey,
    schema: &ArchiveSchema,
    schema_hash: u64,
    options: StoreOptions,
) -> Result<Archive> {
    let path = archive_path(dir, key);

    if !path.exists() {
        let archive = Archive::create(&path, schema)?;
        info!(key = %key, path = %path.display(), "created archive");
        return Ok(archive);
    }

    let opened = Archive::open(&path).and_then(|archive| {
        if archive.schema_hash() == schema_hash {
            Ok(archive)
        } else {
            Err(StoreError::SchemaMismatch {
                key: key.to_string(),
                existing: archive.schema_hash(),
                expected: schema_hash,
            }
            .into())
        }
    });

    match opened {
        Ok(archive) => {
            debug!(key = %key, "opened archive");
            Ok(archive)
        }
        Err(e @ (HwtrendError::Archive(ArchiveError::Corrupted { .. }) | HwtrendError::Store(StoreError::SchemaMismatch { .. })))
            if options.recreate_corrupt =>
        {
            warn!(key = %key, error = %e, "recreating unusable archive");
            Archive::create(&path, schema)
        }
        Err(e) => Err(e),
    }
}

/// Read-only handle over a data directory.
///
/// Holds no files open; every fetch opens the archive, takes a shared lock,
/// reads and closes it again.
#[derive(Debug, Clone)]
pub struct StoreReader {
    dir: PathBuf,
}

impl StoreReader {
    /// Creates a reader over `dir`. The directory need not exist yet.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The data directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Fetches from `key` relative to the current time.
    ///
    /// Never fails: problems are logged and yield an empty result.
    pub fn fetch(&self, key: &str, request: &FetchRequest) -> FetchResult {
        self.fetch_at(key, request, now_secs())
    }

    /// Fetches from `key`, resolving relative times against `now`.
    ///
    /// Unknown or invalid keys, invalid time expressions, empty ranges and
    /// unreadable archives all yield an empty result and a log record.
    pub fn fetch_at(&self, key: &str, request: &FetchRequest, now: u64) -> FetchResult {
        match self.try_fetch(key, request, now) {
            Ok(result) => {
                debug!(
                    key,
                    points = result.len(),
                    step = result.step(),
                    incomplete = result.may_be_incomplete(),
                    "fetch"
                );
                result
            }
            Err(e @ HwtrendError::Archive(_)) => {
                error!(key, error = %e, "failed to read archive");
                FetchResult::empty()
            }
            Err(e) => {
                warn!(key, error = %e, "fetch returned no data");
                FetchResult::empty()
            }
        }
    }

    fn try_fetch(&self, key: &str, request: &FetchRequest, now: u64) -> Result<FetchResult> {
        let key = SeriesKey::parse(key)?;
        let (start, end) = resolve_range(&request.start, &request.end, now)?;
        let path = self.existing_archive(&key)?;
        let preference = request.step_preference(start, end);

        read_archive(&path, |view| {
            fetch_view(view, request.consolidation_fn, start, end, preference)
        })
    }

    fn existing_archive(&self, key: &SeriesKey) -> Result<PathBuf> {
        let path = archive_path(&self.dir, key);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StoreError::UnknownSeries { key: key.to_string() }.into())
        }
    }

    /// Band metadata of one archive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownSeries`] if there is no archive for `key`
    /// and [`ArchiveError`] if it cannot be read.
    pub fn info(&self, key: &str) -> Result<ArchiveInfo> {
        let key = SeriesKey::parse(key)?;
        let path = self.existing_archive(&key)?;
        read_archive(&path, |view| view.info())
    }

    /// Keys of all archives in the data directory, sorted.
    ///
    /// A missing directory has no keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DirectoryAccess`] if the directory cannot be read.
    pub fn series_keys(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::DirectoryAccess {
                    path: self.dir.clone(),
                    source,
                }
                .into());
            }
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::DirectoryAccess {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && SeriesKey::parse(stem).is_ok()
            {
                keys.push(stem.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }
}
