//! Typed failures raised while planning, decoding, encoding and routing.
//!
//! Operations that only touch memory (the codec, the descriptor wire form, the
//! shard merge and the router) return [`SplitResult`]. Operations that touch the
//! filesystem return `anyhow::Result` with path context attached; the typed cause
//! can still be recovered with `err.downcast_ref::<SplitError>()`.

use std::io;
use thiserror::Error;

/// Result alias for the typed error.
pub type SplitResult<T> = Result<T, SplitError>;

/// Failure taxonomy shared by every component.
#[derive(Error, Debug)]
pub enum SplitError {
    /// No usable chunk/topology metadata for the requested source, or the
    /// planning configuration is contradictory.
    #[error("split planning failed: {0}")]
    SplitPlanningFailed(String),

    /// A length prefix or body could not be parsed. Always fatal to the read in
    /// progress; the stream is never resynchronized past it.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// A value outside the supported type set was handed to the encoder.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Writing to a router destination failed.
    #[error("write to destination {index} failed: {source}")]
    DestinationWriteFailed {
        /// Index of the destination in the router's list.
        index: usize,
        /// Error reported by the destination writer.
        #[source]
        source: io::Error,
    },

    /// A router was constructed over an empty destination list.
    #[error("router requires at least one destination")]
    NoDestinations,

    /// Underlying stream failure that is not a framing problem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SplitError {
    pub fn planning(msg: impl Into<String>) -> Self {
        SplitError::SplitPlanningFailed(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        SplitError::MalformedDocument(msg.into())
    }

    pub fn unsupported(type_name: impl Into<String>) -> Self {
        SplitError::UnsupportedType(type_name.into())
    }

    /// True for [`SplitError::MalformedDocument`].
    pub fn is_malformed(&self) -> bool {
        matches!(self, SplitError::MalformedDocument(_))
    }
}
