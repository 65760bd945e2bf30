//! Immutable description of one independently readable partition.
//!
//! A [`PartitionDescriptor`] is produced once by a planner and consumed
//! read-only by exactly one reader. It has no interior mutability, so it can be
//! cloned or shared across threads freely, and it has a stable binary wire form
//! for shipping to remote workers:
//!
//! ```text
//! source      string   (i32 LE byte length + UTF-8)
//! auth        string   (empty = none)
//! filter      encoded document
//! projection  encoded document
//! sort        encoded document
//! limit       i32 LE
//! skip        i32 LE
//! no_timeout  u8 (0 / 1)
//! kind        u8 (0 = collection, 1 = file)
//! start       i64 LE   (file partitions only)
//! end         i64 LE   (file partitions only, -1 = end of stream)
//! min         encoded document
//! max         encoded document
//! ```

use crate::document::{self, Document};
use crate::error::{SplitError, SplitResult};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::io::{ErrorKind, Read, Write};

const KIND_COLLECTION: u8 = 0;
const KIND_FILE: u8 = 1;
const EOF_MARKER: i64 = -1;

/// A `[start, end)` byte range inside a document file.
///
/// `end == None` means "until the end of the stream" and is used when the
/// length is not known up front, e.g. for compressed files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn to_eof(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Number of bytes covered, when the end is known.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Whether a document starting at `offset` belongs to this range.
    pub fn owns(&self, offset: u64) -> bool {
        offset >= self.start && self.end.is_none_or(|end| offset < end)
    }
}

impl Display for ByteRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, EOF)", self.start),
        }
    }
}

/// One unit of work: where to read, what to select, and for file partitions
/// which bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionDescriptor {
    source: String,
    auth: Option<String>,
    filter: Document,
    projection: Document,
    sort: Document,
    limit: i32,
    skip: i32,
    no_timeout: bool,
    range: Option<ByteRange>,
    min: Document,
    max: Document,
}

impl PartitionDescriptor {
    /// Start building a descriptor for `source`.
    pub fn builder(source: impl Into<String>) -> PartitionDescriptorBuilder {
        PartitionDescriptorBuilder {
            inner: PartitionDescriptor {
                source: source.into(),
                auth: None,
                filter: Document::new(),
                projection: Document::new(),
                sort: Document::new(),
                limit: 0,
                skip: 0,
                no_timeout: false,
                range: None,
                min: Document::new(),
                max: Document::new(),
            },
        }
    }

    /// A file partition over `range` with no selection applied.
    pub fn file(path: impl Into<String>, range: ByteRange) -> Self {
        Self::builder(path).byte_range(range).build()
    }

    /// A builder seeded with every field of `self`, for deriving a variant.
    pub fn to_builder(&self) -> PartitionDescriptorBuilder {
        PartitionDescriptorBuilder {
            inner: self.clone(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn auth(&self) -> Option<&str> {
        self.auth.as_deref()
    }

    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn projection(&self) -> &Document {
        &self.projection
    }

    pub fn sort(&self) -> &Document {
        &self.sort
    }

    /// Raw limit; `0` means unbounded.
    pub fn limit(&self) -> i32 {
        self.limit
    }

    pub fn skip(&self) -> i32 {
        self.skip
    }

    /// The limit as a count, `None` when unbounded. A negative limit caps the
    /// result at its absolute value.
    pub fn effective_limit(&self) -> Option<usize> {
        match self.limit {
            0 => None,
            n => Some(n.unsigned_abs() as usize),
        }
    }

    /// The skip as a count; negative values skip nothing.
    pub fn effective_skip(&self) -> usize {
        usize::try_from(self.skip).unwrap_or(0)
    }

    pub fn no_timeout(&self) -> bool {
        self.no_timeout
    }

    /// Byte range for file partitions, `None` for collection partitions.
    pub fn byte_range(&self) -> Option<ByteRange> {
        self.range
    }

    pub fn is_file(&self) -> bool {
        self.range.is_some()
    }

    /// Inclusive lower index bound of a chunk partition (empty = unbounded).
    pub fn min(&self) -> &Document {
        &self.min
    }

    /// Exclusive upper index bound of a chunk partition (empty = unbounded).
    pub fn max(&self) -> &Document {
        &self.max
    }

    /// Serialize to the wire form.
    ///
    /// # Errors
    /// [`SplitError::UnsupportedType`] if one of the embedded documents cannot
    /// be encoded, or a string is too long for an `i32` length.
    pub fn to_wire(&self) -> SplitResult<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        self.write_wire(&mut out)?;
        Ok(out)
    }

    /// Stream the wire form into `w`.
    pub fn write_wire<W: Write>(&self, w: &mut W) -> SplitResult<()> {
        write_string(w, &self.source)?;
        write_string(w, self.auth.as_deref().unwrap_or(""))?;
        document::write_document(w, &self.filter)?;
        document::write_document(w, &self.projection)?;
        document::write_document(w, &self.sort)?;
        w.write_all(&self.limit.to_le_bytes())?;
        w.write_all(&self.skip.to_le_bytes())?;
        w.write_all(&[u8::from(self.no_timeout)])?;
        match self.range {
            None => w.write_all(&[KIND_COLLECTION])?,
            Some(range) => {
                w.write_all(&[KIND_FILE])?;
                w.write_all(&offset_to_wire(range.start)?.to_le_bytes())?;
                let end = match range.end {
                    Some(end) => offset_to_wire(end)?,
                    None => EOF_MARKER,
                };
                w.write_all(&end.to_le_bytes())?;
            }
        }
        document::write_document(w, &self.min)?;
        document::write_document(w, &self.max)?;
        Ok(())
    }

    /// Parse a complete wire record. Trailing bytes are rejected.
    ///
    /// # Errors
    /// [`SplitError::MalformedDocument`] for a truncated or invalid record.
    pub fn from_wire(bytes: &[u8]) -> SplitResult<Self> {
        let mut cursor = bytes;
        let desc = Self::read_wire(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(SplitError::malformed(format!(
                "{} trailing bytes after partition descriptor",
                cursor.len()
            )));
        }
        Ok(desc)
    }

    /// Read one wire record from a stream.
    pub fn read_wire<R: Read>(r: &mut R) -> SplitResult<Self> {
        let source = read_string(r, "source")?;
        let auth = read_string(r, "auth")?;
        let filter = read_doc(r, "filter")?;
        let projection = read_doc(r, "projection")?;
        let sort = read_doc(r, "sort")?;
        let limit = i32::from_le_bytes(read_array(r, "limit")?);
        let skip = i32::from_le_bytes(read_array(r, "skip")?);
        let no_timeout = read_flag(r, "no_timeout")?;
        let [kind] = read_array::<1, _>(r, "kind")?;
        let range = match kind {
            KIND_COLLECTION => None,
            KIND_FILE => {
                let start = i64::from_le_bytes(read_array(r, "start offset")?);
                let end = i64::from_le_bytes(read_array(r, "end offset")?);
                let start = u64::try_from(start).map_err(|_| {
                    SplitError::malformed(format!("negative start offset {start}"))
                })?;
                let end = match end {
                    EOF_MARKER => None,
                    e => Some(u64::try_from(e).map_err(|_| {
                        SplitError::malformed(format!("invalid end offset {e}"))
                    })?),
                };
                if end.is_some_and(|end| end < start) {
                    return Err(SplitError::malformed(format!(
                        "end offset {end:?} precedes start offset {start}"
                    )));
                }
                Some(ByteRange { start, end })
            }
            other => {
                return Err(SplitError::malformed(format!(
                    "unknown partition kind {other}"
                )));
            }
        };
        let min = read_doc(r, "min")?;
        let max = read_doc(r, "max")?;
        Ok(Self {
            source,
            auth: (!auth.is_empty()).then_some(auth),
            filter,
            projection,
            sort,
            limit,
            skip,
            no_timeout,
            range,
            min,
            max,
        })
    }
}

impl Display for PartitionDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "Partition{{source={}", self.source)?;
        if let Some(range) = self.range {
            write!(f, ", range={range}")?;
        }
        if !self.min.is_empty() || !self.max.is_empty() {
            write!(f, ", min={}, max={}", self.min, self.max)?;
        }
        write!(
            f,
            ", filter={}, sort={}, fields={}, skip={}, limit={}, notimeout={}}}",
            self.filter, self.sort, self.projection, self.skip, self.limit, self.no_timeout
        )
    }
}

/// Fluent construction of a [`PartitionDescriptor`].
#[derive(Clone, Debug)]
pub struct PartitionDescriptorBuilder {
    inner: PartitionDescriptor,
}

impl PartitionDescriptorBuilder {
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.inner.source = source.into();
        self
    }

    /// Secondary auth locator; an empty string clears it.
    #[must_use]
    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        let auth = auth.into();
        self.inner.auth = (!auth.is_empty()).then_some(auth);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Document) -> Self {
        self.inner.filter = filter;
        self
    }

    #[must_use]
    pub fn projection(mut self, projection: Document) -> Self {
        self.inner.projection = projection;
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: Document) -> Self {
        self.inner.sort = sort;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i32) -> Self {
        self.inner.limit = limit;
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: i32) -> Self {
        self.inner.skip = skip;
        self
    }

    #[must_use]
    pub fn no_timeout(mut self, no_timeout: bool) -> Self {
        self.inner.no_timeout = no_timeout;
        self
    }

    #[must_use]
    pub fn byte_range(mut self, range: ByteRange) -> Self {
        self.inner.range = Some(range);
        self
    }

    #[must_use]
    pub fn bounds(mut self, min: Document, max: Document) -> Self {
        self.inner.min = min;
        self.inner.max = max;
        self
    }

    pub fn build(self) -> PartitionDescriptor {
        self.inner
    }
}

fn offset_to_wire(offset: u64) -> SplitResult<i64> {
    i64::try_from(offset)
        .map_err(|_| SplitError::unsupported(format!("offset {offset} exceeds i64")))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> SplitResult<()> {
    let len = i32::try_from(s.len())
        .map_err(|_| SplitError::unsupported(format!("string of {} bytes", s.len())))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_array<const N: usize, R: Read>(r: &mut R, field: &str) -> SplitResult<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|e| wire_error(e, field))?;
    Ok(buf)
}

fn read_flag<R: Read>(r: &mut R, field: &str) -> SplitResult<bool> {
    match read_array::<1, _>(r, field)? {
        [0] => Ok(false),
        [1] => Ok(true),
        [other] => Err(SplitError::malformed(format!(
            "{field} flag has byte {other:#04x}"
        ))),
    }
}

fn read_string<R: Read>(r: &mut R, field: &str) -> SplitResult<String> {
    let len = i32::from_le_bytes(read_array(r, field)?);
    let len = usize::try_from(len)
        .map_err(|_| SplitError::malformed(format!("{field} has negative length {len}")))?;
    let mut buf = Vec::with_capacity(len.min(1 << 16));
    let got = r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if got < len {
        return Err(SplitError::malformed(format!(
            "{field} truncated after {got} of {len} bytes"
        )));
    }
    String::from_utf8(buf).map_err(|e| SplitError::malformed(format!("{field} is not UTF-8: {e}")))
}

fn read_doc<R: Read>(r: &mut R, field: &str) -> SplitResult<Document> {
    document::read_document(r)?
        .ok_or_else(|| SplitError::malformed(format!("descriptor ends before {field}")))
}

fn wire_error(e: std::io::Error, field: &str) -> SplitError {
    if e.kind() == ErrorKind::UnexpectedEof {
        SplitError::malformed(format!("descriptor ends inside {field}"))
    } else {
        SplitError::Io(e)
    }
}
