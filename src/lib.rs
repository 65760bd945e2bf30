//! # docsplit
//!
//! Partition planning and output routing for document stores: a sharded
//! collection or a flat file of encoded documents is cut into independently
//! readable partitions, each described by an immutable
//! [`PartitionDescriptor`] that can be shipped to a worker, and output
//! documents are spread evenly over a fixed set of destinations.
//!
//! ## Key Features
//!
//! - **Document codec** - a length-prefixed, self-describing binary format for
//!   nested documents (a subset of BSON)
//! - **Shard-aware planning** - per-shard partition queues merged round-robin so
//!   the first partitions hit as many shards as possible
//! - **Chunk planning** - one partition per chunk of a sharded collection, read
//!   through the router, through a list of routers, or straight from the shards
//! - **Collection planning** - split keys for unsharded collections, one
//!   partition per shard, and automatic splitter selection over many inputs
//! - **File planning** - byte-aligned cuts of document files, with a persisted
//!   boundary index so the file is only scanned once
//! - **Compression** - gzip, zstd, bzip2 and xz files (each optional via feature
//!   flags), read and written transparently as single partitions
//! - **Round-robin routing** - a lock-light router safe to share between
//!   producer threads
//!
//! ## Quick Start
//!
//! ```
//! use docsplit::*;
//! use docsplit::testing::TempDirPath;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = TempDirPath::new()?;
//! let path = dir.file_path("events.bson");
//!
//! // Write documents, recording a boundary every ~256 bytes.
//! let mut writer = DocumentFileWriter::create(&path, &FileSplitConfig::with_split_size(256))?;
//! for i in 0..100 {
//!     writer.write(&Document::new().with("_id", i).with("kind", "click"))?;
//! }
//! writer.finish()?;
//!
//! // Plan, then read every partition.
//! let partitions = plan_file_splits(&path, 256)?;
//! assert!(partitions.len() > 1);
//! let docs = Runner::sequential().read_flat(&partitions, None)?;
//! assert_eq!(docs.len(), 100);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`document`] - Value model, binary codec, serde bridge
//! - [`descriptor`] - Partition descriptors and their wire form
//! - [`split`] - Shard merge, chunk, shard and split-key planners, splitter
//!   selection, file splitter
//! - [`reader`] - Streaming documents out of a partition
//! - [`router`] - Round-robin output routing
//! - [`writer`] - Document file destination with boundary recording
//! - [`runner`] - Sequential and parallel partition reading
//! - [`io`] - Compression and glob helpers
//! - [`testing`] - In-memory collaborators, fixtures, assertions
//!
//! ## Logging
//!
//! Planning decisions, index loads and saves, partition reads and destination
//! failures are reported through [`tracing`]. No subscriber is installed.

pub mod descriptor;
pub mod document;
pub mod error;
pub mod io;
pub mod reader;
pub mod router;
pub mod runner;
pub mod split;
pub mod testing;
pub mod writer;

// General re-exports
pub use descriptor::{ByteRange, PartitionDescriptor, PartitionDescriptorBuilder};
pub use document::{Document, Value, decode, encode};
pub use error::{SplitError, SplitResult};
pub use io::Compression;
pub use reader::{CollectionSource, DocumentStream, open_reader, open_reader_with};
pub use router::{DocumentSink, RoundRobinRouter, compose_output};
pub use runner::{ExecMode, Runner};
pub use split::chunk::{ChunkInfo, ChunkSplitConfig, ChunkSplitter, Topology};
pub use split::collection::{
    CollectionSplitConfig, ShardSplitter, SingleSplitter, StandaloneSplitter, select_splitter,
};
pub use split::file::{
    BoundaryIndex, BoundaryRecorder, FileSplitConfig, FileSplitter, plan_file_splits,
    plan_glob_splits,
};
pub use split::shard::plan_shard_splits;
pub use split::{MultiSplitter, Splitter, plan_or_whole_source};
pub use writer::DocumentFileWriter;
