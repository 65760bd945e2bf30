//! Appending documents to a file while recording split boundaries.

use crate::document::{Document, encode};
use crate::io::compression::{Compression, DynWrite};
use crate::router::DocumentSink;
use crate::split::file::{BoundaryIndex, BoundaryRecorder, FileSplitConfig};
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A document file being written.
///
/// Uncompressed files get a [`BoundaryRecorder`] when `write_splits` is set and
/// `split_size > 0`; [`finish`](Self::finish) then saves the boundary index
/// next to the file (or under `splits_dir`), so the planner does not have to
/// scan it later.
pub struct DocumentFileWriter {
    path: PathBuf,
    index_path: PathBuf,
    writer: DynWrite,
    recorder: Option<BoundaryRecorder>,
    compression: Compression,
    documents: u64,
    bytes: u64,
}

impl DocumentFileWriter {
    /// Create (or truncate) `path`, making parent directories as needed.
    ///
    /// Any split index left over from the file's previous contents is
    /// removed, so a file rewritten without recording is planned by a scan.
    pub fn create(path: impl AsRef<Path>, config: &FileSplitConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        // Offsets recorded for the previous contents no longer point at documents.
        let index_path = config.index_path(path);
        match fs::remove_file(&index_path) {
            Ok(()) => debug!(path = %index_path.display(), "removed split index of truncated file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("remove {}", index_path.display()));
            }
        }
        let compression = Compression::from_path(path);
        let writer = compression
            .wrap_writer(file)
            .with_context(|| format!("wrap {} with {compression} encoder", path.display()))?;
        let recorder = (!compression.is_compressed() && config.write_splits && config.split_size > 0)
            .then(|| BoundaryRecorder::new(config.split_size));
        Ok(Self {
            path: path.to_path_buf(),
            index_path,
            writer,
            recorder,
            compression,
            documents: 0,
            bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Documents written so far.
    pub fn documents(&self) -> u64 {
        self.documents
    }

    /// Uncompressed bytes written so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Encode and append one document, returning its encoded length.
    pub fn write(&mut self, doc: &Document) -> Result<usize> {
        let buf = encode(doc).with_context(|| format!("encode document for {}", self.path.display()))?;
        self.writer
            .write_all(&buf)
            .with_context(|| format!("write {}", self.path.display()))?;
        self.account(buf.len());
        Ok(buf.len())
    }

    fn account(&mut self, len: usize) {
        self.documents += 1;
        self.bytes += len as u64;
        if let Some(recorder) = &mut self.recorder {
            recorder.record(len as u64);
        }
    }

    /// Flush and close the file, then save the boundary index if one was
    /// recorded. Returns the saved index.
    pub fn finish(mut self) -> Result<Option<BoundaryIndex>> {
        self.writer
            .flush()
            .with_context(|| format!("flush {}", self.path.display()))?;
        // Dropping the writer finishes a compressed stream.
        drop(self.writer);
        debug!(
            path = %self.path.display(),
            documents = self.documents,
            bytes = self.bytes,
            compression = %self.compression,
            "finished document file"
        );
        let Some(recorder) = self.recorder else {
            return Ok(None);
        };
        let index = recorder.into_index();
        index.save(&self.index_path)?;
        Ok(Some(index))
    }
}

impl DocumentSink for DocumentFileWriter {
    fn write_document(&mut self, doc: &Document) -> io::Result<()> {
        let buf = encode(doc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(&buf)?;
        self.account(buf.len());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
