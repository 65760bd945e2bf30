//! File-level helpers shared by the planners, readers and writers.

pub mod compression;
pub mod glob;

pub use compression::Compression;
pub use glob::{expand_document_files, expand_glob};
