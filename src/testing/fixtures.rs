//! Pre-built documents, document files and shard queues.

use crate::descriptor::PartitionDescriptor;
use crate::document::{Document, Value, encode};
use crate::split::chunk::ChunkInfo;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// `n` documents of varying encoded size with `_id` = 0..n.
///
/// # Example
///
/// ```
/// use docsplit::testing::sample_documents;
///
/// let docs = sample_documents(3);
/// assert_eq!(docs[2].get("_id").and_then(|v| v.as_i64()), Some(2));
/// ```
#[must_use]
pub fn sample_documents(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| {
            let id = i as i64;
            Document::new()
                .with("_id", id)
                .with("name", format!("doc-{i:05}"))
                .with("even", i % 2 == 0)
                .with("score", i as f64 * 1.5)
                .with("payload", "x".repeat(i % 37))
                .with(
                    "tags",
                    Value::List((0..i % 4).map(|t| Value::from(format!("t{t}"))).collect()),
                )
                .with("meta", Document::new().with("bucket", (i % 5) as i32).with("note", Value::Null))
        })
        .collect()
}

/// Write `docs` to `path` as a plain document file without a split index.
/// Returns the file length.
pub fn write_document_file(path: impl AsRef<Path>, docs: &[Document]) -> Result<u64> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    let mut len = 0u64;
    for (i, doc) in docs.iter().enumerate() {
        let buf = encode(doc).with_context(|| format!("encode document #{i}"))?;
        w.write_all(&buf)
            .with_context(|| format!("write {}", path.display()))?;
        len += buf.len() as u64;
    }
    w.flush()?;
    Ok(len)
}

/// Document-start offsets of `docs` laid out back to back, starting with 0.
pub fn document_offsets(docs: &[Document]) -> Result<Vec<u64>> {
    let mut offsets = Vec::with_capacity(docs.len());
    let mut pos = 0u64;
    for doc in docs {
        offsets.push(pos);
        pos += encode(doc)?.len() as u64;
    }
    Ok(offsets)
}

/// A collection partition labelled `label`, for merge tests.
#[must_use]
pub fn labelled_partition(label: &str) -> PartitionDescriptor {
    PartitionDescriptor::builder(format!("mongodb://localhost/test.{label}")).build()
}

/// Shard queues from `(shard, count)` pairs; partition `j` of `shard` is
/// labelled `<shard>_<j>`.
#[must_use]
pub fn shard_queues(layout: &[(&str, usize)]) -> Vec<(String, Vec<PartitionDescriptor>)> {
    layout
        .iter()
        .map(|&(shard, count)| {
            let queue = (0..count)
                .map(|j| labelled_partition(&format!("{shard}_{j}")))
                .collect();
            (shard.to_string(), queue)
        })
        .collect()
}

/// Chunks over `_id` cut at `cuts`, assigned to `shards` in turn. The first
/// chunk has no lower bound and the last no upper bound.
#[must_use]
pub fn sample_chunks(shards: &[&str], cuts: &[i64]) -> Vec<ChunkInfo> {
    let mut out = Vec::with_capacity(cuts.len() + 1);
    let mut lower = Document::new();
    for (i, &cut) in cuts.iter().enumerate() {
        let upper = Document::new().with("_id", cut);
        out.push(ChunkInfo::new(shards[i % shards.len()], lower, upper.clone()));
        lower = upper;
    }
    out.push(ChunkInfo::new(
        shards[cuts.len() % shards.len()],
        lower,
        Document::new(),
    ));
    out
}
