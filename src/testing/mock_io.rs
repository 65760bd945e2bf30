//! In-memory collaborators and temporary paths.
//!
//! These stand in for a live cluster and for real output destinations, so
//! planners, readers and routers can be tested without either.

use crate::descriptor::PartitionDescriptor;
use crate::document::{Document, Value};
use crate::reader::{CollectionSource, DocumentStream};
use crate::router::DocumentSink;
use crate::split::chunk::{ChunkInfo, Topology};
use anyhow::{Result, anyhow};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

/// A temporary file that is automatically deleted when dropped.
pub struct TempFilePath {
    #[allow(dead_code)]
    temp_file: NamedTempFile,
    path: PathBuf,
}

impl TempFilePath {
    /// Create a new temporary file.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn new() -> io::Result<Self> {
        let temp_file = NamedTempFile::new()?;
        let path = temp_file.path().to_path_buf();
        Ok(Self { temp_file, path })
    }

    /// Create a new temporary file with a specific extension, e.g. `bson.gz`.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn with_extension(extension: &str) -> io::Result<Self> {
        let temp_file = tempfile::Builder::new()
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        let path = temp_file.path().to_path_buf();
        Ok(Self { temp_file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A temporary directory that is automatically deleted when dropped.
///
/// Prefer this over [`TempFilePath`] when the code under test writes split
/// index side files next to the data file.
pub struct TempDirPath {
    #[allow(dead_code)]
    temp_dir: TempDir,
    path: PathBuf,
}

impl TempDirPath {
    /// Create a new temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().to_path_buf();
        Ok(Self { temp_dir, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A path for `filename` within this directory.
    #[must_use]
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }
}

/// A collection held in memory that answers partition reads.
///
/// Supported selection: top-level equality and `$gt`/`$gte`/`$lt`/`$lte`
/// filters, single-key `min` (inclusive) / `max` (exclusive) bounds, skip,
/// limit, and top-level inclusion or exclusion projections. Sort is ignored;
/// documents come back in insertion order.
#[derive(Clone, Debug, Default)]
pub struct MemoryCollection {
    documents: Vec<Document>,
}

impl MemoryCollection {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// The documents `partition` selects, eagerly.
    pub fn select(&self, partition: &PartitionDescriptor) -> Vec<Document> {
        let limit = partition.effective_limit().unwrap_or(usize::MAX);
        self.documents
            .iter()
            .filter(|d| matches_filter(d, partition.filter()))
            .filter(|d| within_bounds(d, partition.min(), partition.max()))
            .skip(partition.effective_skip())
            .take(limit)
            .map(|d| project(d, partition.projection()))
            .collect()
    }
}

impl CollectionSource for MemoryCollection {
    fn open(&self, partition: &PartitionDescriptor) -> Result<DocumentStream> {
        Ok(Box::new(self.select(partition).into_iter().map(Ok)))
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn matches_condition(field: Option<&Value>, condition: &Value) -> bool {
    let ops = condition
        .as_document()
        .filter(|d| d.keys().next().is_some_and(|k| k.starts_with('$')));
    let Some(ops) = ops else {
        return field.is_some_and(|f| f == condition || compare(f, condition) == Some(Ordering::Equal));
    };
    let Some(field) = field else {
        return false;
    };
    ops.iter().all(|(op, bound)| {
        let ord = compare(field, bound);
        match op {
            "$gt" => ord == Some(Ordering::Greater),
            "$gte" => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => ord == Some(Ordering::Less),
            "$lte" => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            "$eq" => ord == Some(Ordering::Equal),
            _ => false,
        }
    })
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, condition)| matches_condition(doc.get(key), condition))
}

fn within_bounds(doc: &Document, min: &Document, max: &Document) -> bool {
    let lower = min.iter().all(|(k, bound)| {
        doc.get(k)
            .and_then(|v| compare(v, bound))
            .is_some_and(|o| o != Ordering::Less)
    });
    let upper = max.iter().all(|(k, bound)| {
        doc.get(k)
            .and_then(|v| compare(v, bound))
            .is_some_and(|o| o == Ordering::Less)
    });
    lower && upper
}

fn project(doc: &Document, projection: &Document) -> Document {
    if projection.is_empty() {
        return doc.clone();
    }
    let included = |v: &Value| v.as_bool().unwrap_or_else(|| v.as_i64() != Some(0));
    let inclusive = projection
        .iter()
        .filter(|(k, _)| *k != "_id")
        .any(|(_, v)| included(v));
    let keep_id = projection.get("_id").is_none_or(|v| included(v));
    doc.iter()
        .filter(|(k, _)| {
            if *k == "_id" {
                return keep_id;
            }
            match projection.get(k) {
                Some(v) => included(v),
                None => !inclusive,
            }
        })
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Fixed topology metadata for chunk planning.
///
/// # Example
///
/// ```
/// use docsplit::document::Document;
/// use docsplit::split::chunk::Topology;
/// use docsplit::testing::StaticTopology;
///
/// let topo = StaticTopology::new()
///     .with_chunk("db.c", "rs0", Document::new(), Document::new())
///     .with_shard("rs0", "rs0/h1:27018,h2:27018");
/// assert_eq!(topo.chunks("db.c").unwrap().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticTopology {
    chunks: HashMap<String, Vec<ChunkInfo>>,
    shards: HashMap<String, String>,
    split_keys: HashMap<String, Vec<Document>>,
    unavailable: bool,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_chunk(mut self, namespace: &str, shard: &str, min: Document, max: Document) -> Self {
        self.chunks
            .entry(namespace.to_string())
            .or_default()
            .push(ChunkInfo::new(shard, min, max));
        self
    }

    #[must_use]
    pub fn with_chunks(mut self, namespace: &str, chunks: Vec<ChunkInfo>) -> Self {
        self.chunks
            .entry(namespace.to_string())
            .or_default()
            .extend(chunks);
        self
    }

    #[must_use]
    pub fn with_shard(mut self, id: &str, hosts: &str) -> Self {
        self.shards.insert(id.to_string(), hosts.to_string());
        self
    }

    /// Split points returned for the unsharded collection `namespace`,
    /// whatever key pattern and chunk size are asked for.
    #[must_use]
    pub fn with_split_keys(mut self, namespace: &str, keys: Vec<Document>) -> Self {
        self.split_keys.insert(namespace.to_string(), keys);
        self
    }

    /// Make every query fail, as if the config servers were unreachable.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

impl Topology for StaticTopology {
    fn chunks(&self, namespace: &str) -> Result<Vec<ChunkInfo>> {
        if self.unavailable {
            return Err(anyhow!("topology unavailable"));
        }
        Ok(self.chunks.get(namespace).cloned().unwrap_or_default())
    }

    fn shard_hosts(&self) -> Result<HashMap<String, String>> {
        if self.unavailable {
            return Err(anyhow!("topology unavailable"));
        }
        Ok(self.shards.clone())
    }

    /// A namespace is sharded when it has chunks.
    fn is_sharded(&self, namespace: &str) -> Result<bool> {
        if self.unavailable {
            return Err(anyhow!("topology unavailable"));
        }
        Ok(self.chunks.contains_key(namespace))
    }

    fn split_keys(
        &self,
        namespace: &str,
        _key_pattern: &Document,
        _max_chunk_size_mb: i32,
    ) -> Result<Vec<Document>> {
        if self.unavailable {
            return Err(anyhow!("topology unavailable"));
        }
        Ok(self.split_keys.get(namespace).cloned().unwrap_or_default())
    }
}

/// A destination that keeps what it receives.
///
/// With [`failing_after`](Self::failing_after) it accepts `n` documents and
/// rejects every later write with a broken-pipe error.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub documents: Vec<Document>,
    pub flushes: usize,
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }
}

impl DocumentSink for MemorySink {
    fn write_document(&mut self, doc: &Document) -> io::Result<()> {
        if self.fail_after.is_some_and(|n| self.documents.len() >= n) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.documents.push(doc.clone());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.fail_after == Some(0) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.flushes += 1;
        Ok(())
    }
}
