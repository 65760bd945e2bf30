//! Planning for whole collections, sharded or not.
//!
//! [`select_splitter`] looks at the collection and the config and picks one of:
//!
//! - [`SingleSplitter`] when split creation is disabled,
//! - [`StandaloneSplitter`] for unsharded collections (and sharded ones that
//!   are neither read by chunk nor by shard),
//! - [`ChunkSplitter`] for sharded collections read by chunk,
//! - [`ShardSplitter`] for sharded collections read one shard at a time.

use crate::descriptor::PartitionDescriptor;
use crate::document::Document;
use crate::error::SplitError;
use crate::split::Splitter;
use crate::split::chunk::{
    ChunkSplitConfig, ChunkSplitter, Topology, namespace_of, partition_for_bounds,
    rewrite_locator, strip_replica_set,
};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Default distance between computed split keys, in megabytes.
pub const DEFAULT_SPLIT_SIZE_MB: i32 = 8;

/// Knobs for [`select_splitter`].
#[derive(Clone, Debug)]
pub struct CollectionSplitConfig {
    /// When false the collection is read as one partition.
    pub create_splits: bool,
    /// Read a sharded collection one chunk per partition.
    pub shard_chunks: bool,
    /// Key pattern the split keys of an unsharded collection are taken on.
    pub split_key: Document,
    /// Target size of an unsharded collection's partitions.
    pub split_size_mb: i32,
    /// Shared with the chunk splitter. `target_shards` also selects
    /// [`ShardSplitter`] for sharded collections when `shard_chunks` is off,
    /// and `range_query` applies to standalone split keys too.
    pub chunk: ChunkSplitConfig,
}

impl Default for CollectionSplitConfig {
    fn default() -> Self {
        Self {
            create_splits: true,
            shard_chunks: true,
            split_key: Document::new().with("_id", 1),
            split_size_mb: DEFAULT_SPLIT_SIZE_MB,
            chunk: ChunkSplitConfig::default(),
        }
    }
}

/// Pick the splitter for the collection named by `template`'s locator.
///
/// # Errors
/// [`SplitError::SplitPlanningFailed`] if the locator names no collection or
/// the topology cannot say whether it is sharded.
pub fn select_splitter<'t>(
    template: PartitionDescriptor,
    config: CollectionSplitConfig,
    topology: &'t dyn Topology,
) -> Result<Box<dyn Splitter + 't>> {
    if !config.create_splits {
        debug!(source = template.source(), "split creation disabled");
        return Ok(Box::new(SingleSplitter::new(template)));
    }
    let namespace = namespace_of(template.source())?;
    let sharded = topology.is_sharded(&namespace).map_err(|e| {
        SplitError::planning(format!("couldn't get collection stats for {namespace}: {e:#}"))
    })?;
    let splitter: Box<dyn Splitter + 't> = if !sharded {
        debug!(namespace = %namespace, "unsharded collection, using split keys");
        Box::new(StandaloneSplitter::new(template, config, topology))
    } else if config.shard_chunks {
        debug!(namespace = %namespace, "sharded collection, one partition per chunk");
        Box::new(ChunkSplitter::new(template, config.chunk, topology))
    } else if config.chunk.target_shards {
        debug!(namespace = %namespace, "sharded collection, one partition per shard");
        Box::new(ShardSplitter::new(template, topology))
    } else {
        debug!(namespace = %namespace, "sharded collection read like an unsharded one");
        Box::new(StandaloneSplitter::new(template, config, topology))
    };
    Ok(splitter)
}

/// The whole source as one partition.
#[derive(Clone, Debug)]
pub struct SingleSplitter {
    template: PartitionDescriptor,
}

impl SingleSplitter {
    pub fn new(template: PartitionDescriptor) -> Self {
        Self { template }
    }
}

impl Splitter for SingleSplitter {
    fn calculate_splits(&self) -> Result<Vec<PartitionDescriptor>> {
        Ok(vec![self.template.clone()])
    }
}

/// Cuts an unsharded collection at the split keys the store computes.
///
/// Keys `k1 < k2 < … < kn` give the partitions `[−∞, k1)`, `[k1, k2)`, …,
/// `[kn, +∞)`. No keys gives one unbounded partition.
pub struct StandaloneSplitter<'t> {
    template: PartitionDescriptor,
    config: CollectionSplitConfig,
    topology: &'t dyn Topology,
}

impl<'t> StandaloneSplitter<'t> {
    pub fn new(
        template: PartitionDescriptor,
        config: CollectionSplitConfig,
        topology: &'t dyn Topology,
    ) -> Self {
        Self {
            template,
            config,
            topology,
        }
    }
}

impl Splitter for StandaloneSplitter<'_> {
    fn calculate_splits(&self) -> Result<Vec<PartitionDescriptor>> {
        let namespace = namespace_of(self.template.source())?;
        info!(namespace = %namespace, key = %self.config.split_key, size_mb = self.config.split_size_mb, "computing split keys");
        let keys = self
            .topology
            .split_keys(&namespace, &self.config.split_key, self.config.split_size_mb)
            .map_err(|e| SplitError::planning(format!("error calculating splits for {namespace}: {e:#}")))?;
        if keys.is_empty() {
            warn!(namespace = %namespace, "no split keys were calculated; reading a single partition");
        }

        let range_query = self.config.chunk.range_query;
        let unbounded = Document::new();
        let mut out = Vec::with_capacity(keys.len() + 1);
        let mut lower = &unbounded;
        for key in &keys {
            out.push(partition_for_bounds(&self.template, range_query, lower, key)?);
            lower = key;
        }
        out.push(partition_for_bounds(&self.template, range_query, lower, &unbounded)?);
        Ok(out)
    }
}

/// One partition per shard, read straight from the shard with no key bounds.
///
/// Shards are visited in id order. Documents that are mid-migration may be
/// seen twice or not at all, so chunk planning is normally preferable.
pub struct ShardSplitter<'t> {
    template: PartitionDescriptor,
    topology: &'t dyn Topology,
}

impl<'t> ShardSplitter<'t> {
    pub fn new(template: PartitionDescriptor, topology: &'t dyn Topology) -> Self {
        Self { template, topology }
    }
}

impl Splitter for ShardSplitter<'_> {
    fn calculate_splits(&self) -> Result<Vec<PartitionDescriptor>> {
        let hosts = self
            .topology
            .shard_hosts()
            .map_err(|e| SplitError::planning(format!("couldn't get shards information: {e:#}")))?;
        if hosts.is_empty() {
            return Err(SplitError::planning("topology lists no shards").into());
        }
        let mut shards: Vec<_> = hosts.into_iter().collect();
        shards.sort();
        let locator = self.template.source();
        Ok(shards
            .iter()
            .map(|(_, hosts)| {
                self.template
                    .to_builder()
                    .source(rewrite_locator(locator, strip_replica_set(hosts)))
                    .build()
            })
            .collect())
    }
}
