//! Byte-aligned partitions of flat document files.
//!
//! A document file is a plain concatenation of encoded documents. It can be cut
//! at any document start, and those starts are only discoverable by walking the
//! length prefixes from the front. Two ways exist to learn them:
//!
//! - at write time, a [`BoundaryRecorder`] notes a cut every time at least
//!   `split_size` bytes were written since the previous cut;
//! - at plan time, [`FileSplitter`] walks the file applying the same rule.
//!
//! Either way the result is a [`BoundaryIndex`], persisted next to the data file
//! as `.<file name>.splits` so later plans can skip the walk.
//!
//! ```no_run
//! use docsplit::split::file::plan_file_splits;
//!
//! let partitions = plan_file_splits("dump/db/events.bson", 64 * 1024 * 1024)?;
//! for range in partitions.iter().filter_map(|p| p.byte_range()) {
//!     println!("{range}");
//! }
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use crate::descriptor::{ByteRange, PartitionDescriptor};
use crate::document::{LENGTH_PREFIX_LEN, read_length_prefix};
use crate::error::{SplitError, SplitResult};
use crate::io::compression::Compression;
use crate::io::glob::expand_document_files;
use crate::split::Splitter;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Default distance between recorded boundaries: 64 MiB.
pub const DEFAULT_SPLIT_SIZE: i64 = 64 * 1024 * 1024;

const INDEX_PREFIX: &str = ".";
const INDEX_SUFFIX: &str = ".splits";
const OFFSET_LEN: usize = 8;

/// Planning knobs for document files.
#[derive(Clone, Debug)]
pub struct FileSplitConfig {
    /// Minimum number of bytes between two boundaries. `<= 0` disables
    /// splitting.
    pub split_size: i64,
    /// Compute boundaries at all. When false every file is one partition.
    pub read_splits: bool,
    /// Persist boundaries computed by a scan (or by a writer) to the side file.
    pub write_splits: bool,
    /// Keep side files here instead of next to the data files.
    pub splits_dir: Option<PathBuf>,
}

impl Default for FileSplitConfig {
    fn default() -> Self {
        Self {
            split_size: DEFAULT_SPLIT_SIZE,
            read_splits: true,
            write_splits: true,
            splits_dir: None,
        }
    }
}

impl FileSplitConfig {
    pub fn with_split_size(split_size: i64) -> Self {
        Self {
            split_size,
            ..Self::default()
        }
    }

    /// Where the boundary index of `data` lives under this config.
    pub fn index_path(&self, data: &Path) -> PathBuf {
        BoundaryIndex::side_path(data, self.splits_dir.as_deref())
    }
}

/// Tracks the write offset of a document file and records a boundary each
/// time the distance from the previous boundary reaches the threshold.
#[derive(Clone, Debug)]
pub struct BoundaryRecorder {
    threshold: i64,
    offset: u64,
    last: u64,
    boundaries: Vec<u64>,
}

impl BoundaryRecorder {
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold,
            offset: 0,
            last: 0,
            boundaries: Vec::new(),
        }
    }

    /// Account for one complete document of `doc_len` bytes just appended.
    pub fn record(&mut self, doc_len: u64) {
        self.offset += doc_len;
        if self.threshold > 0 && self.offset - self.last >= self.threshold as u64 {
            self.boundaries.push(self.offset);
            self.last = self.offset;
        }
    }

    /// Bytes accounted so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn boundaries(&self) -> &[u64] {
        &self.boundaries
    }

    /// The recorded boundaries, minus one sitting exactly at the end of the
    /// stream since that would open an empty partition.
    pub fn into_index(mut self) -> BoundaryIndex {
        if self.boundaries.last() == Some(&self.offset) {
            self.boundaries.pop();
        }
        BoundaryIndex {
            offsets: self.boundaries,
        }
    }
}

/// Ordered document-start offsets of one file, excluding 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoundaryIndex {
    offsets: Vec<u64>,
}

impl BoundaryIndex {
    /// # Errors
    /// [`SplitError::MalformedDocument`] unless the offsets are strictly
    /// increasing.
    pub fn new(offsets: Vec<u64>) -> SplitResult<Self> {
        if let Some(pair) = offsets.windows(2).find(|w| w[0] >= w[1]) {
            return Err(SplitError::malformed(format!(
                "split offsets not strictly increasing: {} then {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { offsets })
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// `.<name>.splits` next to `data`, or inside `splits_dir` when given.
    pub fn side_path(data: &Path, splits_dir: Option<&Path>) -> PathBuf {
        let name = data
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = format!("{INDEX_PREFIX}{name}{INDEX_SUFFIX}");
        match (splits_dir, data.parent()) {
            (Some(dir), _) => dir.join(file),
            (None, Some(parent)) => parent.join(file),
            (None, None) => PathBuf::from(file),
        }
    }

    /// Side file layout: consecutive little-endian `u64`s, no header.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.offsets.iter().flat_map(|o| o.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> SplitResult<Self> {
        if bytes.len() % OFFSET_LEN != 0 {
            return Err(SplitError::malformed(format!(
                "split index length {} is not a multiple of {OFFSET_LEN}",
                bytes.len()
            )));
        }
        let offsets = bytes
            .chunks_exact(OFFSET_LEN)
            .map(|c| {
                let mut raw = [0u8; OFFSET_LEN];
                raw.copy_from_slice(c);
                u64::from_le_bytes(raw)
            })
            .collect();
        Self::new(offsets)
    }

    /// Apply the boundary rule with `threshold` to these offsets: an offset is
    /// kept only if it lies at least `threshold` bytes past the previous kept
    /// cut. Every offset is a document start, so the result is still a valid
    /// index; an index recorded with the same threshold is returned unchanged.
    #[must_use]
    pub fn thinned(&self, threshold: i64) -> BoundaryIndex {
        if threshold <= 0 {
            return BoundaryIndex::default();
        }
        let threshold = threshold as u64;
        let mut last = 0;
        let offsets = self
            .offsets
            .iter()
            .copied()
            .filter(|&o| {
                let keep = o - last >= threshold;
                if keep {
                    last = o;
                }
                keep
            })
            .collect();
        BoundaryIndex { offsets }
    }

    /// Check the index still fits a data file of `file_len` bytes.
    pub fn validate_for(&self, file_len: u64) -> SplitResult<()> {
        match self.offsets.iter().find(|&&o| o == 0 || o >= file_len) {
            Some(bad) => Err(SplitError::malformed(format!(
                "split offset {bad} outside (0, {file_len})"
            ))),
            None => Ok(()),
        }
    }

    /// Read a side file. `Ok(None)` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let index = Self::from_bytes(&bytes).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(index))
    }

    /// Write the side file atomically, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).with_context(|| format!("mkdir -p {}", dir.display()))?;
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        tmp.write_all(&self.to_bytes())
            .with_context(|| format!("write split index for {}", path.display()))?;
        tmp.persist(path)
            .with_context(|| format!("persist {}", path.display()))?;
        debug!(path = %path.display(), boundaries = self.len(), "saved split index");
        Ok(())
    }

    /// The partitions of `source` cut at these offsets.
    pub fn partitions(&self, source: &str, file_len: u64) -> Vec<PartitionDescriptor> {
        partitions_from_boundaries(source, &self.offsets, file_len)
    }
}

/// Whether `path` names a boundary index side file.
pub fn is_index_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with(INDEX_PREFIX) && n.ends_with(INDEX_SUFFIX))
}

/// Cut `[0, file_len)` at `boundaries`.
///
/// Boundaries at 0 or at/after `file_len` are ignored, so no partition is ever
/// empty except the single `[0, 0)` partition of an empty file.
pub fn partitions_from_boundaries(
    source: &str,
    boundaries: &[u64],
    file_len: u64,
) -> Vec<PartitionDescriptor> {
    let mut out = Vec::with_capacity(boundaries.len() + 1);
    let mut start = 0;
    for &b in boundaries {
        if b <= start || b >= file_len {
            continue;
        }
        out.push(PartitionDescriptor::file(source, ByteRange::new(start, b)));
        start = b;
    }
    out.push(PartitionDescriptor::file(source, ByteRange::new(start, file_len)));
    out
}

/// Plans the partitions of one document file.
#[derive(Clone, Debug)]
pub struct FileSplitter {
    path: PathBuf,
    config: FileSplitConfig,
}

impl FileSplitter {
    pub fn new(path: impl Into<PathBuf>, config: FileSplitConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &FileSplitConfig {
        &self.config
    }

    /// Load the side index if present and still valid for a file of
    /// `file_len` bytes. Anything unusable is logged and ignored.
    fn load_index(&self, file_len: u64) -> Option<BoundaryIndex> {
        let index_path = self.config.index_path(&self.path);
        let index = match BoundaryIndex::load(&index_path) {
            Ok(Some(index)) => index,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %index_path.display(), error = %format!("{e:#}"), "ignoring unreadable split index");
                return None;
            }
        };
        if let Err(e) = index.validate_for(file_len) {
            warn!(path = %index_path.display(), error = %e, "ignoring stale split index");
            return None;
        }
        debug!(path = %index_path.display(), boundaries = index.len(), "using split index");
        Some(index)
    }
}

impl Splitter for FileSplitter {
    fn calculate_splits(&self) -> Result<Vec<PartitionDescriptor>> {
        let path = &self.path;
        let source = path.to_string_lossy().into_owned();
        let file_len = fs::metadata(path)
            .with_context(|| format!("stat {}", path.display()))?
            .len();

        let compression = Compression::from_path(path);
        if compression.is_compressed() {
            info!(path = %path.display(), %compression, "compressed file is read as a single partition");
            return Ok(vec![PartitionDescriptor::file(source, ByteRange::to_eof(0))]);
        }
        let split_size = self.config.split_size;
        if split_size <= 0 || !self.config.read_splits || file_len < split_size as u64 {
            debug!(path = %path.display(), file_len, split_size, "planning file as a single partition");
            return Ok(partitions_from_boundaries(&source, &[], file_len));
        }

        let index = match self.load_index(file_len) {
            Some(index) => index.thinned(split_size),
            None => {
                let index = scan_boundaries(path, split_size)?;
                info!(path = %path.display(), boundaries = index.len(), "scanned document file for split points");
                if self.config.write_splits {
                    let index_path = self.config.index_path(path);
                    if let Err(e) = index.save(&index_path) {
                        warn!(path = %index_path.display(), error = %format!("{e:#}"), "couldn't save split index");
                    }
                }
                index
            }
        };
        Ok(index.partitions(&source, file_len))
    }
}

/// Walk the length prefixes of an uncompressed document file and apply the
/// boundary rule with `threshold`.
///
/// # Errors
/// Fails with [`SplitError::MalformedDocument`] (wrapped with path context) if
/// a prefix is invalid or a document runs past the end of the file.
pub fn scan_boundaries(path: &Path, threshold: i64) -> Result<BoundaryIndex> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let file_len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    let mut reader = BufReader::new(file);
    let mut recorder = BoundaryRecorder::new(threshold);
    while let Some(len) = next_document_len(&mut reader, recorder.offset(), file_len)
        .with_context(|| format!("scan {} at offset {}", path.display(), recorder.offset()))?
    {
        recorder.record(len);
    }
    Ok(recorder.into_index())
}

/// First document start at or after `offset`.
///
/// Walks forward from the nearest boundary in `index` that does not pass
/// `offset`, or from the start of the file without an index. Returns the file
/// length when no document starts at or after `offset`.
pub fn aligned_start(path: &Path, offset: u64, index: Option<&BoundaryIndex>) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let file_len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    if offset >= file_len {
        return Ok(file_len);
    }
    let mut pos = index
        .and_then(|idx| idx.offsets().iter().rev().find(|&&b| b <= offset && b < file_len))
        .copied()
        .unwrap_or(0);
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(pos))
        .with_context(|| format!("seek {} to {pos}", path.display()))?;
    while pos < offset {
        match next_document_len(&mut reader, pos, file_len)
            .with_context(|| format!("walk {} at offset {pos}", path.display()))?
        {
            Some(len) => pos += len,
            None => break,
        }
    }
    Ok(pos)
}

/// Plan `path` with the default config and `split_size` as the threshold.
pub fn plan_file_splits(path: impl AsRef<Path>, split_size: i64) -> Result<Vec<PartitionDescriptor>> {
    FileSplitter::new(path.as_ref(), FileSplitConfig::with_split_size(split_size)).calculate_splits()
}

/// Plan every document file matching `pattern`, in sorted path order.
pub fn plan_glob_splits(pattern: &str, config: &FileSplitConfig) -> Result<Vec<PartitionDescriptor>> {
    let files = expand_document_files(pattern)?;
    debug!(pattern, files = files.len(), "expanded document file pattern");
    let mut out = Vec::new();
    for file in files {
        out.extend(FileSplitter::new(file, config.clone()).calculate_splits()?);
    }
    Ok(out)
}

/// Length of the document at `pos`, leaving the reader positioned after it.
fn next_document_len(
    reader: &mut BufReader<File>,
    pos: u64,
    file_len: u64,
) -> SplitResult<Option<u64>> {
    let Some(len) = read_length_prefix(reader)? else {
        return Ok(None);
    };
    let len = len as u64;
    if pos + len > file_len {
        return Err(SplitError::malformed(format!(
            "document at {pos} declares {len} bytes but the file ends at {file_len}"
        )));
    }
    reader.seek_relative((len - LENGTH_PREFIX_LEN as u64) as i64)?;
    Ok(Some(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_cuts_after_threshold() {
        let mut r = BoundaryRecorder::new(10);
        for _ in 0..5 {
            r.record(4);
        }
        // 4, 8, 12 -> cut, 16, 20 -> not yet (8 since 12)
        assert_eq!(r.boundaries(), &[12]);
        r.record(4);
        assert_eq!(r.boundaries(), &[12, 24]);
    }

    #[test]
    fn recorder_never_cuts_without_threshold() {
        let mut r = BoundaryRecorder::new(0);
        r.record(100);
        r.record(100);
        assert!(r.into_index().is_empty());
    }

    #[test]
    fn trailing_boundary_at_eof_is_dropped() {
        let mut r = BoundaryRecorder::new(5);
        r.record(5);
        r.record(5);
        assert_eq!(r.boundaries(), &[5, 10]);
        assert_eq!(r.into_index().offsets(), &[5]);
    }

    #[test]
    fn index_bytes_are_validated() {
        assert!(BoundaryIndex::from_bytes(&[0; 7]).is_err());
        let mut bytes = 20u64.to_le_bytes().to_vec();
        bytes.extend(10u64.to_le_bytes());
        assert!(BoundaryIndex::from_bytes(&bytes).is_err());
        let idx = BoundaryIndex::new(vec![10, 20]).unwrap();
        assert_eq!(BoundaryIndex::from_bytes(&idx.to_bytes()).unwrap(), idx);
        assert!(idx.validate_for(21).is_ok());
        assert!(idx.validate_for(20).is_err());
    }

    #[test]
    fn side_path_naming() {
        let data = Path::new("/data/dump/events.bson");
        assert_eq!(
            BoundaryIndex::side_path(data, None),
            PathBuf::from("/data/dump/.events.bson.splits")
        );
        assert_eq!(
            BoundaryIndex::side_path(data, Some(Path::new("/idx"))),
            PathBuf::from("/idx/.events.bson.splits")
        );
        assert!(is_index_file(Path::new("/data/dump/.events.bson.splits")));
        assert!(!is_index_file(data));
    }

    #[test]
    fn thinning_applies_the_threshold_to_recorded_offsets() {
        let idx = BoundaryIndex::new(vec![3, 5, 9, 12, 20]).unwrap();
        assert_eq!(idx.thinned(1), idx);
        assert_eq!(idx.thinned(5).offsets(), &[5, 12, 20]);
        assert_eq!(idx.thinned(10).offsets(), &[12]);
        assert!(idx.thinned(100).is_empty());
        assert!(idx.thinned(0).is_empty());
    }

    #[test]
    fn boundaries_outside_file_are_ignored() {
        let parts = partitions_from_boundaries("f", &[0, 10, 10, 30, 40], 30);
        let ranges: Vec<_> = parts.iter().filter_map(|p| p.byte_range()).collect();
        assert_eq!(ranges, vec![ByteRange::new(0, 10), ByteRange::new(10, 30)]);
    }
}
