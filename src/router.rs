//! Round-robin distribution of output documents over a fixed set of sinks.

use crate::document::{Document, Value};
use crate::error::{SplitError, SplitResult};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// A destination documents can be written to.
pub trait DocumentSink {
    fn write_document(&mut self, doc: &Document) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: DocumentSink + ?Sized> DocumentSink for Box<S> {
    fn write_document(&mut self, doc: &Document) -> io::Result<()> {
        (**self).write_document(doc)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Hands the n-th routed document to destination `n % N`.
///
/// The counter is the only state shared between producers: concurrent callers
/// each get a distinct position, and each destination sits behind its own lock.
/// Documents routed to the same destination are written in the order their
/// producers acquire that destination's lock. A failed write is reported to
/// the caller as is; nothing is retried or redirected.
pub struct RoundRobinRouter<S> {
    destinations: Vec<Mutex<S>>,
    counter: AtomicU64,
}

impl<S: DocumentSink> RoundRobinRouter<S> {
    /// # Errors
    /// [`SplitError::NoDestinations`] for an empty list.
    pub fn new(destinations: Vec<S>) -> SplitResult<Self> {
        if destinations.is_empty() {
            return Err(SplitError::NoDestinations);
        }
        Ok(Self {
            destinations: destinations.into_iter().map(Mutex::new).collect(),
            counter: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Number of documents routed so far, failed writes included.
    pub fn routed(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Write `doc` to the next destination and return its index.
    ///
    /// Calls made one after another reach each destination in routing order.
    /// Concurrent calls that land on the same destination may be written in
    /// either order: the position is taken before the destination's lock, and
    /// the lock decides who writes first.
    pub fn route(&self, doc: &Document) -> SplitResult<usize> {
        let n = self.destinations.len() as u64;
        let index = (self.counter.fetch_add(1, Ordering::Relaxed) % n) as usize;
        let mut sink = self.destinations[index]
            .lock()
            .map_err(|_| SplitError::DestinationWriteFailed {
                index,
                source: io::Error::other("destination lock poisoned"),
            })?;
        sink.write_document(doc).map_err(|source| {
            warn!(index, error = %source, "destination write failed");
            SplitError::DestinationWriteFailed { index, source }
        })?;
        Ok(index)
    }

    /// Route the output document for a key/value pair, see [`compose_output`].
    pub fn route_pair(&self, key: impl Into<Value>, value: impl Into<Value>) -> SplitResult<usize> {
        self.route(&compose_output(key.into(), value.into()))
    }

    /// Flush every destination. All are attempted; the first failure is
    /// returned.
    pub fn flush_all(&self) -> SplitResult<()> {
        let mut first = None;
        for (index, dest) in self.destinations.iter().enumerate() {
            let result = match dest.lock() {
                Ok(mut sink) => sink.flush(),
                Err(_) => Err(io::Error::other("destination lock poisoned")),
            };
            if let Err(source) = result {
                warn!(index, error = %source, "destination flush failed");
                first.get_or_insert(SplitError::DestinationWriteFailed { index, source });
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Take the destinations back, in construction order.
    pub fn into_destinations(self) -> Vec<S> {
        self.destinations
            .into_iter()
            .map(|m| m.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .collect()
    }
}

/// Build the output document for a key/value pair.
///
/// `_id` holds the key and comes first. A document value contributes its
/// fields after it (its own `_id`, if any, loses to the key); any other value
/// is stored under `"value"`.
///
/// ```
/// use docsplit::document::{Document, Value};
/// use docsplit::router::compose_output;
///
/// let doc = compose_output(Value::from("k"), Value::from(3));
/// assert_eq!(doc, Document::new().with("_id", "k").with("value", 3));
/// ```
pub fn compose_output(key: Value, value: Value) -> Document {
    match value {
        Value::Document(fields) => {
            let mut out = Document::with_capacity(fields.len() + 1);
            out.insert("_id", key);
            for (k, v) in fields {
                if k != "_id" {
                    out.insert(k, v);
                }
            }
            out
        }
        other => Document::new().with("_id", key).with("value", other),
    }
}
