//! Glob expansion for multi-file planning.
//!
//! ```no_run
//! use docsplit::io::glob::expand_document_files;
//!
//! // Every dump file of one collection, in a stable order, without split indexes.
//! let files = expand_document_files("dump/db/*.bson")?;
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use crate::split::file::is_index_file;
use anyhow::{Context, Result};
use glob::glob;
use std::path::PathBuf;

/// Expand a glob pattern into a sorted vector of matching regular files.
///
/// Directories are skipped. No match yields an empty vector, not an error.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }

    result.sort();
    Ok(result)
}

/// [`expand_glob`] without split index side files, so a pattern like
/// `dir/.*` never plans an index as if it held documents.
pub fn expand_document_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut files = expand_glob(pattern)?;
    files.retain(|path| !is_index_file(path));
    Ok(files)
}
