//! Chunk-based planning for sharded collections.
//!
//! The cluster's topology metadata lists every chunk of a collection with the
//! shard that owns it and its `[min, max)` key bounds. [`ChunkSplitter`] turns
//! each chunk into one partition, groups the partitions by shard, and merges the
//! per-shard queues with [`plan_shard_splits`](super::shard::plan_shard_splits).

use crate::descriptor::PartitionDescriptor;
use crate::document::{Document, Value};
use crate::error::{SplitError, SplitResult};
use crate::split::Splitter;
use crate::split::shard::plan_shard_splits;
use std::collections::HashMap;
use tracing::{debug, info};

/// One chunk as reported by the topology.
///
/// Unbounded sides are expressed by omitting the field, i.e. an empty `min`
/// is the lowest possible key and an empty `max` the highest.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkInfo {
    pub shard: String,
    pub min: Document,
    pub max: Document,
}

impl ChunkInfo {
    pub fn new(shard: impl Into<String>, min: Document, max: Document) -> Self {
        Self {
            shard: shard.into(),
            min,
            max,
        }
    }
}

/// Read access to cluster topology metadata.
pub trait Topology {
    /// Chunks of `namespace` (`database.collection`) in metadata order.
    fn chunks(&self, namespace: &str) -> anyhow::Result<Vec<ChunkInfo>>;

    /// Shard id to host string, e.g. `rs0/h1:27018,h2:27018`.
    fn shard_hosts(&self) -> anyhow::Result<HashMap<String, String>>;

    /// Whether `namespace` is distributed over shards.
    fn is_sharded(&self, namespace: &str) -> anyhow::Result<bool>;

    /// Split points the store computes for an unsharded collection: keys of
    /// `key_pattern` roughly `max_chunk_size_mb` apart, in ascending order.
    fn split_keys(
        &self,
        namespace: &str,
        key_pattern: &Document,
        max_chunk_size_mb: i32,
    ) -> anyhow::Result<Vec<Document>>;
}

/// Knobs for [`ChunkSplitter`].
#[derive(Clone, Debug, Default)]
pub struct ChunkSplitConfig {
    /// Read each chunk straight from the shard that owns it instead of through
    /// the router host in the source locator.
    pub target_shards: bool,
    /// Router hosts to spread chunk reads over, assigned round-robin in chunk
    /// order. Must be empty when `target_shards` is set.
    pub mongos_hosts: Vec<String>,
    /// Express chunk bounds as `$gte`/`$lt` conditions on the filter rather
    /// than as index `min`/`max` bounds.
    pub range_query: bool,
}

/// Plans one partition per chunk of a sharded collection.
pub struct ChunkSplitter<'t> {
    template: PartitionDescriptor,
    config: ChunkSplitConfig,
    topology: &'t dyn Topology,
}

impl<'t> ChunkSplitter<'t> {
    /// `template` supplies the locator and the selection (filter, projection,
    /// sort, no-timeout) shared by every produced partition.
    pub fn new(
        template: PartitionDescriptor,
        config: ChunkSplitConfig,
        topology: &'t dyn Topology,
    ) -> Self {
        Self {
            template,
            config,
            topology,
        }
    }

    /// Build the partition for one chunk, without any locator rewriting.
    ///
    /// # Errors
    /// [`SplitError::SplitPlanningFailed`] in range-query mode when a bound is a
    /// compound key or the filter already constrains the split key.
    pub fn split_from_bounds(&self, min: &Document, max: &Document) -> SplitResult<PartitionDescriptor> {
        partition_for_bounds(&self.template, self.config.range_query, min, max)
    }
}

/// `template` restricted to keys in `[min, max)`, either as index bounds or,
/// with `range_query`, as `$gte`/`$lt` conditions merged into the filter.
///
/// # Errors
/// [`SplitError::SplitPlanningFailed`] in range-query mode when a bound is a
/// compound key or the filter already constrains the split key.
pub fn partition_for_bounds(
    template: &PartitionDescriptor,
    range_query: bool,
    min: &Document,
    max: &Document,
) -> SplitResult<PartitionDescriptor> {
    debug!(%min, %max, range_query, "creating split from bounds");
    if !range_query {
        return Ok(template.to_builder().bounds(min.clone(), max.clone()).build());
    }
    let filter = range_filter(template.filter(), min, max)?;
    Ok(template
        .to_builder()
        .filter(filter)
        .bounds(Document::new(), Document::new())
        .build())
}

impl Splitter for ChunkSplitter<'_> {
    fn calculate_splits(&self) -> anyhow::Result<Vec<PartitionDescriptor>> {
        let locator = self.template.source();
        let namespace = namespace_of(locator)?;
        let chunks = self.topology.chunks(&namespace).map_err(|e| {
            SplitError::planning(format!("couldn't read chunk metadata for {namespace}: {e:#}"))
        })?;
        if chunks.is_empty() {
            return Err(SplitError::planning(format!("no chunk metadata for {namespace}")).into());
        }
        if self.config.target_shards && !self.config.mongos_hosts.is_empty() {
            return Err(SplitError::planning(
                "targeting shards and listing mongos hosts are mutually exclusive",
            )
            .into());
        }

        let shard_hosts = if self.config.target_shards {
            let raw = self.topology.shard_hosts().map_err(|e| {
                SplitError::planning(format!("couldn't get shards information: {e:#}"))
            })?;
            Some(
                raw.into_iter()
                    .map(|(id, hosts)| (id, strip_replica_set(&hosts).to_string()))
                    .collect::<HashMap<_, _>>(),
            )
        } else {
            None
        };
        if !self.config.mongos_hosts.is_empty() {
            info!(
                hosts = self.config.mongos_hosts.len(),
                "spreading chunk reads over mongos hosts round-robin"
            );
        }

        let num_chunks = chunks.len();
        let mut queues: HashMap<String, Vec<PartitionDescriptor>> = HashMap::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let split = self.split_from_bounds(&chunk.min, &chunk.max)?;
            let split = if let Some(hosts) = &shard_hosts {
                let Some(shard_host) = hosts.get(&chunk.shard) else {
                    return Err(SplitError::planning(format!(
                        "couldn't find shard id {} in shard metadata",
                        chunk.shard
                    ))
                    .into());
                };
                split.to_builder().source(rewrite_locator(locator, shard_host)).build()
            } else if !self.config.mongos_hosts.is_empty() {
                let host = &self.config.mongos_hosts[i % self.config.mongos_hosts.len()];
                split.to_builder().source(rewrite_locator(locator, host)).build()
            } else {
                split
            };
            queues.entry(chunk.shard).or_default().push(split);
        }
        debug!(namespace = %namespace, chunks = num_chunks, shards = queues.len(), "grouped chunks by shard");
        Ok(plan_shard_splits(queues, Some(num_chunks)))
    }
}

/// `{key: {"$gte": min, "$lt": max}}` merged into `filter`.
fn range_filter(filter: &Document, min: &Document, max: &Document) -> SplitResult<Document> {
    if min.is_empty() && max.is_empty() {
        return Ok(filter.clone());
    }
    let lower = min.single_entry();
    let upper = max.single_entry();
    if (!min.is_empty() && lower.is_none()) || (!max.is_empty() && upper.is_none()) {
        return Err(SplitError::planning(format!(
            "range query is enabled but a split bound is a compound key: min={min}, max={max}"
        )));
    }
    let key = match (lower, upper) {
        (Some((a, _)), Some((b, _))) if a != b => {
            return Err(SplitError::planning(format!(
                "range query bounds use different keys: min={min}, max={max}"
            )));
        }
        (Some((k, _)), _) | (None, Some((k, _))) => k,
        (None, None) => return Ok(filter.clone()),
    };
    if filter.contains_key(key) {
        return Err(SplitError::planning(format!(
            "range query is enabled but split key {key:?} conflicts with filter {filter}"
        )));
    }
    let mut range = Document::new();
    if let Some((_, v)) = lower {
        range.insert("$gte", v.clone());
    }
    if let Some((_, v)) = upper {
        range.insert("$lt", v.clone());
    }
    let mut out = filter.clone();
    out.insert(key, Value::Document(range));
    Ok(out)
}

/// `database.collection` from a `scheme://hosts/database.collection?options`
/// locator.
pub fn namespace_of(locator: &str) -> SplitResult<String> {
    let rest = locator.split_once("://").map_or(locator, |(_, r)| r);
    let path = rest
        .split_once('/')
        .map(|(_, p)| p.split('?').next().unwrap_or(""))
        .unwrap_or("");
    if path.is_empty() || !path.contains('.') {
        return Err(SplitError::planning(format!(
            "locator {locator:?} does not name a database.collection"
        )));
    }
    Ok(path.to_string())
}

/// Replace the host list of `locator`, keeping credentials, path and options.
///
/// ```
/// use docsplit::split::chunk::rewrite_locator;
///
/// assert_eq!(
///     rewrite_locator("mongodb://u:p@old:27017/db.c?w=1", "a:1,b:2"),
///     "mongodb://u:p@a:1,b:2/db.c?w=1"
/// );
/// ```
pub fn rewrite_locator(locator: &str, hosts: &str) -> String {
    let (scheme, rest) = match locator.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, locator),
    };
    let host_end = rest.find('/').unwrap_or(rest.len());
    let host_start = rest[..host_end].rfind('@').map_or(0, |at| at + 1);
    let rewritten = format!("{}{}{}", &rest[..host_start], hosts, &rest[host_end..]);
    match scheme {
        Some(scheme) => format!("{scheme}://{rewritten}"),
        None => rewritten,
    }
}

/// `set/h1,h2` → `h1,h2`.
pub(crate) fn strip_replica_set(hosts: &str) -> &str {
    match hosts.find('/') {
        Some(slash) if slash > 0 => &hosts[slash + 1..],
        _ => hosts,
    }
}
