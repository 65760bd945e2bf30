use crate::descriptor::PartitionDescriptor;
use crate::document::Document;
use crate::reader::{CollectionSource, open_reader, open_reader_with};
use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::debug;

/// How [`Runner`] reads a list of partitions.
#[derive(Clone, Copy, Debug)]
pub enum ExecMode {
    Sequential,
    /// One rayon task per partition on a dedicated pool; `threads` defaults to
    /// the number of CPUs.
    Parallel { threads: Option<usize> },
}

/// Reads whole partition lists into memory, for tests and for hosts without
/// their own execution engine.
///
/// Results always come back in partition order, whatever the mode.
pub struct Runner {
    pub mode: ExecMode,
}

impl Default for Runner {
    fn default() -> Self {
        let mode = if cfg!(feature = "parallel-io") {
            ExecMode::Parallel { threads: None }
        } else {
            ExecMode::Sequential
        };
        Self { mode }
    }
}

impl Runner {
    pub fn sequential() -> Self {
        Self {
            mode: ExecMode::Sequential,
        }
    }

    pub fn parallel(threads: Option<usize>) -> Self {
        Self {
            mode: ExecMode::Parallel { threads },
        }
    }

    /// Read every partition; `source` serves collection partitions.
    ///
    /// The first failing partition fails the whole call.
    pub fn read_all(
        &self,
        partitions: &[PartitionDescriptor],
        source: Option<&(dyn CollectionSource + Sync)>,
    ) -> Result<Vec<Vec<Document>>> {
        match self.mode {
            ExecMode::Sequential => partitions
                .iter()
                .enumerate()
                .map(|(i, p)| read_partition(i, p, source))
                .collect(),
            ExecMode::Parallel { threads } => {
                let threads = threads.unwrap_or_else(num_cpus::get).max(1);
                debug!(threads, partitions = partitions.len(), "reading partitions in parallel");
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .context("build reader thread pool")?;
                pool.install(|| {
                    partitions
                        .par_iter()
                        .enumerate()
                        .map(|(i, p)| read_partition(i, p, source))
                        .collect()
                })
            }
        }
    }

    /// [`read_all`](Self::read_all), concatenated.
    pub fn read_flat(
        &self,
        partitions: &[PartitionDescriptor],
        source: Option<&(dyn CollectionSource + Sync)>,
    ) -> Result<Vec<Document>> {
        Ok(self.read_all(partitions, source)?.into_iter().flatten().collect())
    }
}

fn read_partition(
    index: usize,
    partition: &PartitionDescriptor,
    source: Option<&(dyn CollectionSource + Sync)>,
) -> Result<Vec<Document>> {
    let stream = match source {
        Some(source) => open_reader_with(partition, source),
        None => open_reader(partition),
    }
    .with_context(|| format!("open partition #{index}"))?;
    stream
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("read partition #{index}"))
}
