//! Streaming documents out of a partition.
//!
//! File partitions are read here directly. Collection partitions need a live
//! connection, which this crate does not own; the host supplies one through
//! [`CollectionSource`].

use crate::descriptor::{ByteRange, PartitionDescriptor};
use crate::document::{Document, decode, read_document_remainder, read_length_prefix};
use crate::error::SplitError;
use crate::io::compression::{Compression, DynRead};
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use tracing::debug;

/// Lazily decoded documents of one partition.
///
/// A decode failure is yielded once as an `Err` and the stream ends after it.
pub type DocumentStream = Box<dyn Iterator<Item = Result<Document>> + Send>;

/// Opens collection (non-file) partitions.
pub trait CollectionSource {
    /// Stream the documents selected by `partition`: its filter, projection,
    /// sort, skip and limit, restricted to its key bounds.
    fn open(&self, partition: &PartitionDescriptor) -> Result<DocumentStream>;
}

/// Open a file partition.
///
/// # Errors
/// Fails if the partition is not a file partition, if the file cannot be
/// opened, or if a compressed file is asked for a range not starting at 0.
pub fn open_reader(partition: &PartitionDescriptor) -> Result<DocumentStream> {
    let Some(range) = partition.byte_range() else {
        bail!(
            "partition of {} has no byte range; collection partitions need a CollectionSource",
            partition.source()
        );
    };
    Ok(Box::new(FileDocumentReader::open(partition.source(), range)?))
}

/// Open any partition, using `source` for collection partitions.
pub fn open_reader_with(
    partition: &PartitionDescriptor,
    source: &dyn CollectionSource,
) -> Result<DocumentStream> {
    if partition.is_file() {
        open_reader(partition)
    } else {
        source
            .open(partition)
            .with_context(|| format!("open collection partition {partition}"))
    }
}

/// Decodes the documents whose start offset lies inside a byte range.
///
/// A document that starts inside the range but whose declared length would
/// cross its end is reported as malformed rather than read.
pub struct FileDocumentReader {
    path: String,
    inner: DynRead,
    pos: u64,
    end: Option<u64>,
    read: u64,
    done: bool,
}

impl FileDocumentReader {
    pub fn open(path: &str, range: ByteRange) -> Result<Self> {
        let compression = Compression::from_path(path);
        if compression.is_compressed() && range.start != 0 {
            bail!(
                "{path} is {compression}-compressed and can only be read from offset 0, not {}",
                range.start
            );
        }
        let mut file = File::open(path).with_context(|| format!("open {path}"))?;
        if range.start > 0 {
            file.seek(SeekFrom::Start(range.start))
                .with_context(|| format!("seek {path} to {}", range.start))?;
        }
        let inner = compression
            .wrap_reader(file)
            .with_context(|| format!("wrap {path} with {compression} decoder"))?;
        debug!(path, %range, %compression, "opened file partition");
        Ok(Self {
            path: path.to_string(),
            inner,
            pos: range.start,
            end: range.end,
            read: 0,
            done: false,
        })
    }

    /// Offset of the next document, relative to the decompressed stream.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn read_next(&mut self) -> Result<Option<Document>, SplitError> {
        let Some(len) = read_length_prefix(&mut self.inner)? else {
            return Ok(None);
        };
        let len = len as u64;
        if let Some(end) = self.end
            && self.pos + len > end
        {
            return Err(SplitError::malformed(format!(
                "document at {} declares {len} bytes and crosses the partition end {end}",
                self.pos
            )));
        }
        let raw = read_document_remainder(&mut self.inner, len as usize)?;
        let doc = decode(&raw)?;
        self.pos += len;
        Ok(Some(doc))
    }

    fn finish(&mut self) {
        self.done = true;
        debug!(path = %self.path, documents = self.read, end = self.pos, "finished file partition");
    }
}

impl Iterator for FileDocumentReader {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(end) = self.end
            && self.pos >= end
        {
            self.finish();
            return None;
        }
        match self.read_next() {
            Ok(Some(doc)) => {
                self.read += 1;
                Some(Ok(doc))
            }
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.done = true;
                let context = format!("read {} at offset {}", self.path, self.pos);
                Some(Err(anyhow::Error::new(e).context(context)))
            }
        }
    }
}
