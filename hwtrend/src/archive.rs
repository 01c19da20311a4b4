//! Memory-mapped archive file format for hwtrend series.
//!
//! Every series lives in its own fixed-size file. The size is determined by
//! the schema at creation and never changes afterwards.
//!
//! # File Format
//!
//! All integers and floats are little-endian.
//!
//! ```text
//! [0..128)             Header
//! [128..128+64*B)      Band directory (B entries)
//! [128+64*B..)         Data region: per band, timestamp column then value column
//! ```
//!
//! Header:
//!
//! ```text
//!  0  magic "HWTA"          4  format version (u32)
//!  8  schema hash (u64)    16  primary step in seconds (u64)
//! 24  band count (u32)     32  last update (u64, u64::MAX = never)
//! 40  primary window start 48  last raw value (f64, NaN = unknown)
//! 56  primary sum (f64)    64  primary min (f64)
//! 72  primary max (f64)    80  primary count (u32)
//! ```
//!
//! Band directory entry:
//!
//! ```text
//!  0  step (u64)            8  capacity (u32)
//! 12  consolidation fn (u8) 16  xff (f64)
//! 24  pending start (u64)   32  pending sum (f64)
//! 40  pending min (f64)     48  pending max (f64)
//! 56  pending count (u32)
//! ```
//!
//! # Concurrency
//!
//! The single writer takes an exclusive advisory lock on the file for each
//! update; readers take a shared lock for the duration of a read. New files
//! are fully initialized under a temporary name and renamed into place.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use serde::Serialize;
use tracing::{debug, warn};

use crate::consolidate::{Accumulator, ArchiveState, BandState, PrimaryWindow, RowSink};
use crate::error::{ArchiveError, Result};
use crate::ring::Ring;
use crate::schema::{ArchiveSchema, ConsolidationFn};

/// Magic bytes identifying an hwtrend archive.
const ARCHIVE_MAGIC: [u8; 4] = *b"HWTA";

/// Current archive format version.
const ARCHIVE_VERSION: u32 = 1;

/// Size of the archive header in bytes.
const HEADER_SIZE: usize = 128;

/// Size of each band directory entry in bytes.
const BAND_ENTRY_SIZE: usize = 64;

/// Upper bound on the band count accepted when opening a file.
const MAX_BANDS: usize = 1024;

/// Upper bound on the capacity of one band accepted when opening a file.
const MAX_CAPACITY: u32 = 10_000_000;

/// Marker for "no update yet" in the last-update field.
const NEVER: u64 = u64::MAX;

/// File extension of archive files.
pub const ARCHIVE_EXTENSION: &str = "hwa";

/// Byte offsets and ring locations of one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    /// One ring per band, in directory order.
    rings: Vec<Ring>,
    /// Total file size in bytes.
    file_size: usize,
}

impl ArchiveLayout {
    /// Computes the layout for the given `(step, capacity)` of each band.
    fn new(bands: impl IntoIterator<Item = (u64, u32)>) -> Self {
        let bands: Vec<(u64, u32)> = bands.into_iter().collect();
        let mut offset = HEADER_SIZE + bands.len() * BAND_ENTRY_SIZE;

        let rings = bands
            .into_iter()
            .map(|(step, capacity)| {
                let ring = Ring::new(step, capacity, offset);
                offset += Ring::byte_len(capacity);
                ring
            })
            .collect();

        Self {
            rings,
            file_size: offset,
        }
    }

    /// Layout of a new archive with the given schema.
    pub fn for_schema(schema: &ArchiveSchema) -> Self {
        Self::new(schema.bands().map(|b| (b.step, b.capacity)))
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> usize {
        self.file_size
    }

    /// Rings in band order.
    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    fn band_entry_offset(band: usize) -> usize {
        HEADER_SIZE + band * BAND_ENTRY_SIZE
    }
}

/// Everything decoded from the header and band directory.
#[derive(Debug)]
struct Decoded {
    schema_hash: u64,
    state: ArchiveState,
    layout: ArchiveLayout,
}

fn corrupted(path: &Path, reason: impl Into<String>) -> ArchiveError {
    ArchiveError::Corrupted {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn decode(bytes: &[u8], path: &Path) -> Result<Decoded> {
    if bytes.len() < HEADER_SIZE {
        return Err(corrupted(
            path,
            format!("file too small: {} bytes, expected at least {HEADER_SIZE}", bytes.len()),
        )
        .into());
    }

    if bytes[0..4] != ARCHIVE_MAGIC {
        return Err(corrupted(
            path,
            format!("invalid magic bytes: expected {:?}, found {:?}", ARCHIVE_MAGIC, &bytes[0..4]),
        )
        .into());
    }

    let version = get_u32(bytes, 4);
    if version != ARCHIVE_VERSION {
        return Err(corrupted(
            path,
            format!("unsupported version: expected {ARCHIVE_VERSION}, found {version}"),
        )
        .into());
    }

    let schema_hash = get_u64(bytes, 8);
    let primary_step = get_u64(bytes, 16);
    let band_count = get_u32(bytes, 24) as usize;

    if primary_step == 0 {
        return Err(corrupted(path, "primary step is zero").into());
    }
    if band_count == 0 || band_count > MAX_BANDS {
        return Err(corrupted(path, format!("invalid band count {band_count}")).into());
    }
    if bytes.len() < HEADER_SIZE + band_count * BAND_ENTRY_SIZE {
        return Err(corrupted(path, "file too small for band directory").into());
    }

    let mut bands = Vec::with_capacity(band_count);
    for band in 0..band_count {
        let base = ArchiveLayout::band_entry_offset(band);
        let step = get_u64(bytes, base);
        let capacity = get_u32(bytes, base + 8);

        if step == 0 || step % primary_step != 0 {
            return Err(corrupted(path, format!("band {band} has invalid step {step}")).into());
        }
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(corrupted(path, format!("band {band} has invalid capacity {capacity}")).into());
        }
        let consolidation_fn = ConsolidationFn::from_code(bytes[base + 12]).ok_or_else(|| {
            corrupted(path, format!("band {band} has unknown consolidation code {}", bytes[base + 12]))
        })?;

        bands.push(BandState {
            step,
            capacity,
            consolidation_fn,
            xff: get_f64(bytes, base + 16),
            pending_start: get_u64(bytes, base + 24),
            pending: get_accumulator(bytes, base + 32),
        });
    }

    let layout = ArchiveLayout::new(bands.iter().map(|b| (b.step, b.capacity)));
    if bytes.len() != layout.file_size {
        return Err(corrupted(
            path,
            format!("file size mismatch: {} bytes, expected {}", bytes.len(), layout.file_size),
        )
        .into());
    }

    let last_update = get_u64(bytes, 32);
    let last_value = get_f64(bytes, 48);
    let state = ArchiveState {
        primary_step,
        last_update: (last_update != NEVER).then_some(last_update),
        primary: PrimaryWindow {
            start: get_u64(bytes, 40),
            base: get_accumulator(bytes, 56),
            last_value: (!last_value.is_nan()).then_some(last_value),
        },
        bands,
    };

    Ok(Decoded {
        schema_hash,
        state,
        layout,
    })
}

/// Writes the mutable part of the header and band directory.
fn encode_state(bytes: &mut [u8], state: &ArchiveState) {
    put_u64(bytes, 32, state.last_update.unwrap_or(NEVER));
    put_u64(bytes, 40, state.primary.start);
    put_f64(bytes, 48, state.primary.last_value.unwrap_or(f64::NAN));
    put_accumulator(bytes, 56, &state.primary.base);

    for (band, band_state) in state.bands.iter().enumerate() {
        let base = ArchiveLayout::band_entry_offset(band);
        put_u64(bytes, base + 24, band_state.pending_start);
        put_accumulator(bytes, base + 32, &band_state.pending);
    }
}

/// Writes the immutable part of the header and band directory.
#[allow(clippy::cast_possible_truncation)] // Band count is bounded by MAX_BANDS
fn encode_static(bytes: &mut [u8], schema_hash: u64, state: &ArchiveState) {
    bytes[0..4].copy_from_slice(&ARCHIVE_MAGIC);
    put_u32(bytes, 4, ARCHIVE_VERSION);
    put_u64(bytes, 8, schema_hash);
    put_u64(bytes, 16, state.primary_step);
    put_u32(bytes, 24, state.bands.len() as u32);

    for (band, band_state) in state.bands.iter().enumerate() {
        let base = ArchiveLayout::band_entry_offset(band);
        put_u64(bytes, base, band_state.step);
        put_u32(bytes, base + 8, band_state.capacity);
        bytes[base + 12] = band_state.consolidation_fn.code();
        put_f64(bytes, base + 16, band_state.xff);
    }
}

fn get_accumulator(bytes: &[u8], offset: usize) -> Accumulator {
    Accumulator {
        sum: get_f64(bytes, offset),
        min: get_f64(bytes, offset + 8),
        max: get_f64(bytes, offset + 16),
        count: get_u32(bytes, offset + 24),
    }
}

fn put_accumulator(bytes: &mut [u8], offset: usize, acc: &Accumulator) {
    put_f64(bytes, offset, acc.sum);
    put_f64(bytes, offset + 8, acc.min);
    put_f64(bytes, offset + 16, acc.max);
    put_u32(bytes, offset + 24, acc.count);
}

/// Advisory file lock released on drop.
struct FileLock<'a> {
    file: &'a File,
    path: &'a Path,
}

impl<'a> FileLock<'a> {
    fn exclusive(file: &'a File, path: &'a Path) -> Result<Self> {
        file.lock().map_err(|source| ArchiveError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { file, path })
    }

    fn shared(file: &'a File, path: &'a Path) -> Result<Self> {
        file.lock_shared().map_err(|source| ArchiveError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { file, path })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to unlock archive");
        }
    }
}

/// Rows closed during an update, written straight into the mapping.
struct MappedRows<'a> {
    bytes: &'a mut [u8],
    rings: &'a [Ring],
}

impl RowSink for MappedRows<'_> {
    fn write_row(&mut self, band: usize, start: u64, value: Option<f64>) {
        self.rings[band].write(self.bytes, start, value);
    }
}

/// Writable handle to one archive file.
///
/// The consolidation state is cached in memory and written back to the
/// header after every update. Only one `Archive` per file may exist at a time.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    layout: ArchiveLayout,
    schema_hash: u64,
    state: ArchiveState,
}

impl Archive {
    /// Creates a new archive at `path`, replacing any existing file.
    ///
    /// The file is built under a temporary name, flushed and then renamed
    /// into place, so concurrent readers see either no file or a complete one.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::WriteFailed`] if any file operation fails.
    pub fn create<P: AsRef<Path>>(path: P, schema: &ArchiveSchema) -> Result<Self> {
        let path = path.as_ref();
        let write_failed = |source| ArchiveError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| corrupted(path, "archive path has no file name"))?;
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let layout = ArchiveLayout::for_schema(schema);
        let state = ArchiveState::new(schema);

        {
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .read(true)
                .write(true)
                .open(&tmp_path)
                .map_err(write_failed)?;
            file.set_len(layout.file_size as u64).map_err(write_failed)?;

            // SAFETY: The temporary file was just created by us and is not
            // visible under its final name yet, so nothing else maps it.
            let mut mmap = unsafe { MmapMut::map_mut(&file).map_err(write_failed)? };

            encode_static(&mut mmap, schema.stable_hash(), &state);
            encode_state(&mut mmap, &state);
            for ring in &layout.rings {
                ring.clear(&mut mmap);
            }

            mmap.flush().map_err(write_failed)?;
            file.sync_all().map_err(write_failed)?;
        }

        fs::rename(&tmp_path, path).map_err(write_failed)?;
        debug!(path = %path.display(), size = layout.file_size, "created archive");

        Self::open(path)
    }

    /// Opens an existing archive for writing.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::ReadFailed`] if the file cannot be opened or
    /// mapped and [`ArchiveError::Corrupted`] if the header, band directory
    /// or file length are invalid.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let read_failed = |source| ArchiveError::ReadFailed {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(read_failed)?;
        check_min_len(&file, path)?;

        // SAFETY: Archives are only written through this type, by a single
        // writer, and the file length is never changed after creation.
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(read_failed)? };

        let decoded = {
            let _lock = FileLock::shared(&file, path)?;
            decode(&mmap, path)?
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            layout: decoded.layout,
            schema_hash: decoded.schema_hash,
            state: decoded.state,
        })
    }

    /// Applies one update under an exclusive file lock.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::IngestError::OutOfOrder`] for a timestamp older
    /// than the last update, or [`ArchiveError::Lock`] if locking fails.
    pub fn update(&mut self, key: &str, timestamp: u64, value: f64) -> Result<()> {
        let _lock = FileLock::exclusive(&self.file, &self.path)?;

        let mut rows = MappedRows {
            bytes: &mut self.mmap,
            rings: &self.layout.rings,
        };
        self.state.update(key, timestamp, value, &mut rows)?;
        encode_state(&mut self.mmap, &self.state);

        Ok(())
    }

    /// Schedules the dirty pages of the mapping to be written to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::WriteFailed`] if the flush cannot be started.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush_async().map_err(|source| {
            ArchiveError::WriteFailed {
                path: self.path.clone(),
                source,
            }
            .into()
        })
    }

    /// Schema hash stored in the header.
    pub fn schema_hash(&self) -> u64 {
        self.schema_hash
    }

    /// Current consolidation state.
    pub fn state(&self) -> &ArchiveState {
        &self.state
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read access to the archive through the writer's own mapping.
    pub fn view(&self) -> ArchiveView<'_> {
        ArchiveView {
            schema_hash: self.schema_hash,
            state: &self.state,
            layout: &self.layout,
            bytes: &self.mmap,
        }
    }
}

fn check_min_len(file: &File, path: &Path) -> Result<()> {
    let len = file
        .metadata()
        .map_err(|source| ArchiveError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if len < HEADER_SIZE as u64 {
        return Err(corrupted(
            path,
            format!("file too small: {len} bytes, expected at least {HEADER_SIZE}"),
        )
        .into());
    }
    Ok(())
}

/// Runs `f` over a consistent view of the archive at `path`.
///
/// The file is opened read-only and held under a shared lock while `f` runs,
/// so the writer can never be observed half-way through an update.
///
/// # Errors
///
/// Returns [`ArchiveError`] if the file cannot be opened, locked, mapped or
/// decoded.
pub fn read_archive<P, R>(path: P, f: impl FnOnce(&ArchiveView<'_>) -> R) -> Result<R>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let read_failed = |source| ArchiveError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(read_failed)?;
    let _lock = FileLock::shared(&file, path)?;
    check_min_len(&file, path)?;

    // SAFETY: The shared lock keeps the single writer out while the mapping
    // is read; archive files never change length after creation.
    let mmap = unsafe { Mmap::map(&file).map_err(read_failed)? };
    let decoded = decode(&mmap, path)?;

    let view = ArchiveView {
        schema_hash: decoded.schema_hash,
        state: &decoded.state,
        layout: &decoded.layout,
        bytes: &mmap,
    };
    Ok(f(&view))
}

/// Borrowed, consistent view of an archive's state and rows.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveView<'a> {
    schema_hash: u64,
    state: &'a ArchiveState,
    layout: &'a ArchiveLayout,
    bytes: &'a [u8],
}

impl ArchiveView<'_> {
    /// Schema hash stored in the header.
    pub fn schema_hash(&self) -> u64 {
        self.schema_hash
    }

    /// Consolidation state at the time of the read.
    pub fn state(&self) -> &ArchiveState {
        self.state
    }

    /// Stored value of the row of `band` starting at `start`.
    ///
    /// Returns `None` for unknown, overwritten or never-written rows.
    pub fn row(&self, band: usize, start: u64) -> Option<f64> {
        self.layout.rings.get(band)?.read(self.bytes, start)
    }

    /// Band metadata for display.
    pub fn info(&self) -> ArchiveInfo {
        ArchiveInfo {
            schema_hash: self.schema_hash,
            primary_step: self.state.primary_step,
            last_update: self.state.last_update,
            file_size: self.layout.file_size,
            bands: self
                .state
                .bands
                .iter()
                .zip(&self.layout.rings)
                .map(|(band, ring)| {
                    let written = ring.written_range(self.bytes);
                    BandInfo {
                        step: band.step,
                        capacity: band.capacity,
                        consolidation_fn: band.consolidation_fn,
                        head: band.pending_start,
                        oldest_row: written.map(|(oldest, _)| oldest),
                        newest_row: written.map(|(_, newest)| newest),
                    }
                })
                .collect(),
        }
    }
}

/// Summary of an archive for the `info` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveInfo {
    /// Schema hash from the header.
    pub schema_hash: u64,
    /// Primary step in seconds.
    pub primary_step: u64,
    /// Last accepted update (Unix seconds).
    pub last_update: Option<u64>,
    /// File size in bytes.
    pub file_size: usize,
    /// Per-band details.
    pub bands: Vec<BandInfo>,
}

/// Per-band details of an [`ArchiveInfo`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandInfo {
    /// Row width in seconds.
    pub step: u64,
    /// Ring capacity.
    pub capacity: u32,
    /// Consolidation function.
    pub consolidation_fn: ConsolidationFn,
    /// Start of the pending row.
    pub head: u64,
    /// Oldest row start present in the ring.
    pub oldest_row: Option<u64>,
    /// Newest row start present in the ring.
    pub newest_row: Option<u64>,
}

pub(crate) fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn get_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn get_f64(bytes: &[u8], offset: usize) -> f64 {
    f64::from_bits(get_u64(bytes, offset))
}

pub(crate) fn put_f64(bytes: &mut [u8], offset: usize, value: f64) {
    put_u64(bytes, offset, value.to_bits());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::schema::TierConfig;

    fn small_schema() -> ArchiveSchema {
        ArchiveSchema::new(
            vec![
                TierConfig::new(Duration::from_secs(30), 10).unwrap(),
                TierConfig::new(Duration::from_secs(60), 5).unwrap(),
            ],
            vec![ConsolidationFn::Average, ConsolidationFn::Max],
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn test_archive_layout() {
        let layout = ArchiveLayout::for_schema(&small_schema());

        // Header 128 + 4 band entries * 64 = 384
        // Bands: 10, 10, 5, 5 rows of 16 bytes = 160 + 160 + 80 + 80
        assert_eq!(layout.rings().len(), 4);
        assert_eq!(layout.file_size(), 384 + 480);
    }

    #[test]
    fn test_create_and_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cpu.hwa");
        let schema = small_schema();

        let archive = Archive::create(&path, &schema).unwrap();
        assert_eq!(archive.schema_hash(), schema.stable_hash());
        assert_eq!(archive.state(), &ArchiveState::new(&schema));
        drop(archive);

        // No temporary file left behind
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("cpu.hwa")]);

        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.state(), &ArchiveState::new(&schema));
        assert_eq!(archive.view().info().bands.len(), 4);
    }

    #[test]
    fn test_state_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("fan.hwa");

        let mut archive = Archive::create(&path, &small_schema()).unwrap();
        archive.update("fan", 0, 1.0).unwrap();
        archive.update("fan", 10, 3.0).unwrap();
        archive.update("fan", 30, 5.0).unwrap();
        archive.update("fan", 35, 7.0).unwrap();
        archive.sync().unwrap();
        let expected = archive.state().clone();
        drop(archive);

        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.state(), &expected);
        assert_eq!(archive.state().last_update, Some(35));
        assert_eq!(archive.state().primary.last_value, Some(7.0));
        assert_eq!(archive.view().row(0, 0), Some(2.0));
        assert_eq!(archive.view().row(1, 0), Some(3.0));
    }

    #[test]
    fn test_read_archive_sees_writer_updates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("volt.hwa");

        let mut archive = Archive::create(&path, &small_schema()).unwrap();
        archive.update("volt", 0, 1.5).unwrap();
        archive.update("volt", 30, 1.25).unwrap();

        let (last_update, row) =
            read_archive(&path, |view| (view.state().last_update, view.row(0, 0))).unwrap();
        assert_eq!(last_update, Some(30));
        assert_eq!(row, Some(1.5));
    }

    #[test]
    fn test_create_replaces_existing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("x.hwa");

        let mut archive = Archive::create(&path, &small_schema()).unwrap();
        archive.update("x", 100, 1.0).unwrap();
        drop(archive);

        let archive = Archive::create(&path, &small_schema()).unwrap();
        assert_eq!(archive.state().last_update, None);
    }

    #[test]
    fn test_invalid_magic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.hwa");

        let mut bytes = vec![0u8; 512];
        bytes[0..4].copy_from_slice(b"BAD\0");
        fs::write(&path, bytes).unwrap();

        let err = Archive::open(&path).unwrap_err();
        assert!(err.to_string().contains("invalid magic bytes"));
        assert!(read_archive(&path, |_| ()).is_err());
    }

    #[test]
    fn test_file_too_small() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("small.hwa");
        fs::write(&path, b"small").unwrap();

        let err = Archive::open(&path).unwrap_err();
        assert!(err.to_string().contains("file too small"));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("trunc.hwa");

        drop(Archive::create(&path, &small_schema()).unwrap());
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

        let err = Archive::open(&path).unwrap_err();
        assert!(err.to_string().contains("file size mismatch"));
    }
}
