//! Round-robin merge of per-shard partition queues.
//!
//! Each shard contributes an ordered queue of partitions. The merge visits shard
//! ids in lexicographic order and takes one partition from each non-empty queue
//! per pass, so the head of the output touches as many distinct shards as
//! possible before any shard repeats. A shard holding many more chunks than the
//! others only dominates the tail of the list.

use crate::descriptor::PartitionDescriptor;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Interleave ordered queues keyed by shard id.
///
/// Shard ids are visited in byte-wise lexicographic order on every pass.
/// Empty queues are skipped. Duplicate ids are concatenated in input order.
pub fn round_robin_merge<T, I, Q>(queues: I) -> Vec<T>
where
    I: IntoIterator<Item = (String, Q)>,
    Q: IntoIterator<Item = T>,
{
    let mut by_shard: BTreeMap<String, VecDeque<T>> = BTreeMap::new();
    for (shard, queue) in queues {
        by_shard.entry(shard).or_default().extend(queue);
    }

    let total = by_shard.values().map(VecDeque::len).sum();
    let mut out = Vec::with_capacity(total);
    let mut active: Vec<VecDeque<T>> = by_shard.into_values().filter(|q| !q.is_empty()).collect();
    while !active.is_empty() {
        for queue in &mut active {
            if let Some(item) = queue.pop_front() {
                out.push(item);
            }
        }
        active.retain(|q| !q.is_empty());
    }
    out
}

/// Merge shard partition queues into one globally ordered partition list.
///
/// `num_chunks_hint` is informational only: a mismatch with the real count is
/// logged and never changes the output.
pub fn plan_shard_splits<I, Q>(queues: I, num_chunks_hint: Option<usize>) -> Vec<PartitionDescriptor>
where
    I: IntoIterator<Item = (String, Q)>,
    Q: IntoIterator<Item = PartitionDescriptor>,
{
    let merged = round_robin_merge(queues);
    if let Some(hint) = num_chunks_hint
        && hint != merged.len()
    {
        debug!(
            hint,
            actual = merged.len(),
            "chunk count hint differs from merged partition count"
        );
    }
    debug!(partitions = merged.len(), "merged shard partition queues");
    merged
}
