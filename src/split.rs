//! Partition planners.
//!
//! - [`shard`]: round-robin merge of per-shard partition queues
//! - [`chunk`]: one partition per chunk of a sharded collection
//! - [`collection`]: splitter selection, split keys and per-shard partitions
//! - [`file`]: byte-aligned partitions of a flat document file
//!
//! [`MultiSplitter`] concatenates the plans of several inputs.

pub mod chunk;
pub mod collection;
pub mod file;
pub mod shard;

use crate::descriptor::PartitionDescriptor;
use crate::error::SplitError;
use anyhow::Context;
use chunk::Topology;
use collection::{CollectionSplitConfig, select_splitter};
use tracing::{debug, warn};

/// Something that can cut a source into independently readable partitions.
pub trait Splitter {
    /// Plan the partitions. Runs once per job, before any partition is read.
    fn calculate_splits(&self) -> anyhow::Result<Vec<PartitionDescriptor>>;
}

/// Run `splitter`, and if planning fails with
/// [`SplitError::SplitPlanningFailed`] fall back to reading `whole` as a
/// single partition. Any other error is returned as is.
pub fn plan_or_whole_source(
    splitter: &dyn Splitter,
    whole: &PartitionDescriptor,
) -> anyhow::Result<Vec<PartitionDescriptor>> {
    match splitter.calculate_splits() {
        Ok(splits) => Ok(splits),
        Err(err)
            if err.chain().any(|cause| {
                matches!(
                    cause.downcast_ref::<SplitError>(),
                    Some(SplitError::SplitPlanningFailed(_))
                )
            }) =>
        {
            warn!(source = whole.source(), error = %err, "split planning failed; reading the whole source as one partition");
            Ok(vec![whole.clone()])
        }
        Err(err) => Err(err),
    }
}

/// Plans several inputs and concatenates their partitions in input order.
#[derive(Default)]
pub struct MultiSplitter<'a> {
    inputs: Vec<Box<dyn Splitter + 'a>>,
}

impl<'a> MultiSplitter<'a> {
    pub fn new(inputs: Vec<Box<dyn Splitter + 'a>>) -> Self {
        Self { inputs }
    }

    /// One input per collection template, each with the splitter
    /// [`select_splitter`] picks for it under the shared `config`.
    pub fn for_collections(
        templates: Vec<PartitionDescriptor>,
        config: &CollectionSplitConfig,
        topology: &'a dyn Topology,
    ) -> anyhow::Result<Self> {
        let inputs = templates
            .into_iter()
            .map(|t| select_splitter(t, config.clone(), topology))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(inputs))
    }

    #[must_use]
    pub fn with_input(mut self, input: Box<dyn Splitter + 'a>) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

impl Splitter for MultiSplitter<'_> {
    fn calculate_splits(&self) -> anyhow::Result<Vec<PartitionDescriptor>> {
        let mut out = Vec::new();
        for (i, input) in self.inputs.iter().enumerate() {
            let splits = input
                .calculate_splits()
                .with_context(|| format!("plan input #{i}"))?;
            debug!(input = i, partitions = splits.len(), "planned input");
            out.extend(splits);
        }
        Ok(out)
    }
}
