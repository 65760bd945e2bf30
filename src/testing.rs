//! Testing utilities for planners, readers and routers.
//!
//! This module provides in-memory stand-ins for the collaborators the crate
//! does not own, plus fixtures and assertions:
//!
//! - **Mock I/O**: [`MemoryCollection`], [`StaticTopology`], [`MemorySink`],
//!   and temporary paths that clean up after themselves
//! - **Fixtures**: sample documents, document files and shard queues
//! - **Assertions**: partition tiling and round-robin distribution checks
//!
//! # Quick Start
//!
//! ```
//! use docsplit::split::file::plan_file_splits;
//! use docsplit::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = TempDirPath::new()?;
//! let path = dir.file_path("events.bson");
//! let len = write_document_file(&path, &sample_documents(100))?;
//!
//! let partitions = plan_file_splits(&path, 1024)?;
//! assert_partitions_tile(&partitions, len);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_io;

pub use assertions::*;
pub use fixtures::*;
pub use mock_io::*;
