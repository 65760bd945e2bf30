//! Length-prefixed binary encoding of [`Document`]s.
//!
//! Every encoded document starts with a little-endian `i32` holding the total
//! length *including the prefix itself*, so a reader only needs the first four
//! bytes to know how far to skip. The body is a sequence of tagged elements
//! closed by a `0x00` byte:
//!
//! | tag    | payload                                             |
//! |--------|-----------------------------------------------------|
//! | `0x01` | double, 8 bytes LE                                  |
//! | `0x02` | string: `i32` length incl. NUL, UTF-8, `0x00`       |
//! | `0x03` | nested document                                     |
//! | `0x04` | list, encoded as a document keyed `"0"`, `"1"`, ... |
//! | `0x05` | bytes: `i32` length, subtype `0x00`, raw bytes      |
//! | `0x08` | bool, one byte                                      |
//! | `0x0A` | null, no payload                                    |
//! | `0x10` | int32, 4 bytes LE                                   |
//! | `0x12` | int64, 8 bytes LE                                   |
//!
//! Every key is a NUL-terminated string.

use crate::document::value::{Document, Value};
use crate::error::{SplitError, SplitResult};
use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;
/// Smallest valid document: a prefix and the terminator.
pub const MIN_DOCUMENT_LEN: usize = 5;
/// Nesting limit applied on both encode and decode: the top-level document is
/// level 0 and no document or list may sit at level `MAX_DEPTH` or deeper.
pub const MAX_DEPTH: usize = 100;

const TAG_DOUBLE: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_DOCUMENT: u8 = 0x03;
const TAG_LIST: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_BOOL: u8 = 0x08;
const TAG_NULL: u8 = 0x0A;
const TAG_INT32: u8 = 0x10;
const TAG_INT64: u8 = 0x12;

const BYTES_SUBTYPE_GENERIC: u8 = 0x00;

/// Encode a document.
///
/// # Errors
/// [`SplitError::UnsupportedType`] if a key contains a NUL byte, the nesting
/// exceeds [`MAX_DEPTH`], or the encoding would not fit an `i32` length.
pub fn encode(doc: &Document) -> SplitResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    encode_document(doc, &mut out, 0)?;
    Ok(out)
}

/// Append the encoding of `doc` to `out`.
///
/// On error `out` is left at its original length.
pub fn encode_into(doc: &Document, out: &mut Vec<u8>) -> SplitResult<()> {
    let mark = out.len();
    encode_document(doc, out, 0).inspect_err(|_| out.truncate(mark))
}

fn encode_document(doc: &Document, out: &mut Vec<u8>, depth: usize) -> SplitResult<()> {
    encode_entries(doc.iter(), out, depth)
}

fn encode_list(items: &[Value], out: &mut Vec<u8>, depth: usize) -> SplitResult<()> {
    let keys: Vec<String> = (0..items.len()).map(|i| i.to_string()).collect();
    encode_entries(keys.iter().map(String::as_str).zip(items), out, depth)
}

fn encode_entries<'a>(
    entries: impl Iterator<Item = (&'a str, &'a Value)>,
    out: &mut Vec<u8>,
    depth: usize,
) -> SplitResult<()> {
    if depth >= MAX_DEPTH {
        return Err(SplitError::unsupported(format!(
            "document nested deeper than {MAX_DEPTH} levels"
        )));
    }
    let start = out.len();
    out.extend_from_slice(&[0; LENGTH_PREFIX_LEN]);
    for (key, value) in entries {
        out.push(tag_of(value));
        write_cstring(key, out)?;
        encode_value(value, out, depth)?;
    }
    out.push(0);
    patch_length(out, start)
}

fn encode_value(value: &Value, out: &mut Vec<u8>, depth: usize) -> SplitResult<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(u8::from(*b)),
        Value::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) => {
            out.extend_from_slice(&len_i32(s.len() + 1)?.to_le_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Value::Bytes(b) => {
            out.extend_from_slice(&len_i32(b.len())?.to_le_bytes());
            out.push(BYTES_SUBTYPE_GENERIC);
            out.extend_from_slice(b);
        }
        Value::List(items) => encode_list(items, out, depth + 1)?,
        Value::Document(d) => encode_document(d, out, depth + 1)?,
    }
    Ok(())
}

fn tag_of(value: &Value) -> u8 {
    match value {
        Value::Null => TAG_NULL,
        Value::Bool(_) => TAG_BOOL,
        Value::Int32(_) => TAG_INT32,
        Value::Int64(_) => TAG_INT64,
        Value::Double(_) => TAG_DOUBLE,
        Value::String(_) => TAG_STRING,
        Value::Bytes(_) => TAG_BYTES,
        Value::List(_) => TAG_LIST,
        Value::Document(_) => TAG_DOCUMENT,
    }
}

fn write_cstring(key: &str, out: &mut Vec<u8>) -> SplitResult<()> {
    if key.as_bytes().contains(&0) {
        return Err(SplitError::unsupported(format!(
            "key {key:?} contains a NUL byte"
        )));
    }
    out.extend_from_slice(key.as_bytes());
    out.push(0);
    Ok(())
}

fn len_i32(len: usize) -> SplitResult<i32> {
    i32::try_from(len)
        .map_err(|_| SplitError::unsupported(format!("value of {len} bytes exceeds i32 length")))
}

fn patch_length(out: &mut [u8], start: usize) -> SplitResult<()> {
    let len = len_i32(out.len() - start)?;
    out[start..start + LENGTH_PREFIX_LEN].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Read the declared total length from the front of `bytes`.
///
/// # Errors
/// [`SplitError::MalformedDocument`] if fewer than four bytes are available or
/// the declared length is below [`MIN_DOCUMENT_LEN`].
pub fn peek_length(bytes: &[u8]) -> SplitResult<usize> {
    let Some(prefix) = bytes.first_chunk::<LENGTH_PREFIX_LEN>() else {
        return Err(SplitError::malformed(format!(
            "need {LENGTH_PREFIX_LEN} bytes for length prefix, have {}",
            bytes.len()
        )));
    };
    declared_length(*prefix)
}

fn declared_length(prefix: [u8; LENGTH_PREFIX_LEN]) -> SplitResult<usize> {
    let declared = i32::from_le_bytes(prefix);
    match usize::try_from(declared) {
        Ok(len) if len >= MIN_DOCUMENT_LEN => Ok(len),
        _ => Err(SplitError::malformed(format!(
            "declared length {declared} is below the minimum of {MIN_DOCUMENT_LEN}"
        ))),
    }
}

/// Decode the document at the front of `bytes`. Bytes past its declared
/// length are ignored.
///
/// # Errors
/// [`SplitError::MalformedDocument`] for a short buffer, a declared length
/// beyond the buffer, or a body that does not parse.
pub fn decode(bytes: &[u8]) -> SplitResult<Document> {
    decode_prefix(bytes).map(|(doc, _)| doc)
}

/// Decode the document at the front of `bytes` and report how many bytes it
/// occupied.
pub fn decode_prefix(bytes: &[u8]) -> SplitResult<(Document, usize)> {
    let len = peek_length(bytes)?;
    if len > bytes.len() {
        return Err(SplitError::malformed(format!(
            "declared length {len} exceeds the {} available bytes",
            bytes.len()
        )));
    }
    let doc = Decoder::new(&bytes[..len]).document(0)?;
    Ok((doc, len))
}

/// Read and validate the length prefix of the next document.
///
/// Returns `Ok(None)` when the stream is already at its end.
///
/// # Errors
/// [`SplitError::MalformedDocument`] if the stream ends inside the prefix or
/// the declared length is invalid; [`SplitError::Io`] for any other read
/// failure.
pub fn read_length_prefix<R: Read>(reader: &mut R) -> SplitResult<Option<usize>> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_LEN {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < LENGTH_PREFIX_LEN {
        return Err(SplitError::malformed(format!(
            "stream ended after {filled} bytes of a length prefix"
        )));
    }
    declared_length(prefix).map(Some)
}

/// Read the rest of a document whose prefix declared `len` bytes, returning
/// the complete encoding including the prefix.
///
/// # Errors
/// [`SplitError::MalformedDocument`] if the stream ends inside the body.
pub fn read_document_remainder<R: Read>(reader: &mut R, len: usize) -> SplitResult<Vec<u8>> {
    let declared = i32::try_from(len)
        .map_err(|_| SplitError::malformed(format!("declared length {len} exceeds i32")))?;
    let mut buf = Vec::with_capacity(len.min(1 << 20));
    buf.extend_from_slice(&declared.to_le_bytes());
    let want = len.saturating_sub(LENGTH_PREFIX_LEN) as u64;
    let got = reader.by_ref().take(want).read_to_end(&mut buf)? as u64;
    if got < want {
        return Err(SplitError::malformed(format!(
            "stream ended {} bytes into a document declaring {len} bytes",
            got + LENGTH_PREFIX_LEN as u64
        )));
    }
    Ok(buf)
}

/// Read one encoded document from a stream without decoding it.
///
/// Returns `Ok(None)` when the stream is already at its end.
///
/// # Errors
/// [`SplitError::MalformedDocument`] if the stream ends inside the prefix or
/// inside the body; [`SplitError::Io`] for any other read failure.
pub fn read_raw_document<R: Read>(reader: &mut R) -> SplitResult<Option<Vec<u8>>> {
    match read_length_prefix(reader)? {
        Some(len) => read_document_remainder(reader, len).map(Some),
        None => Ok(None),
    }
}

/// Read and decode one document from a stream; `Ok(None)` at end of stream.
pub fn read_document<R: Read>(reader: &mut R) -> SplitResult<Option<Document>> {
    match read_raw_document(reader)? {
        Some(raw) => decode(&raw).map(Some),
        None => Ok(None),
    }
}

/// Encode `doc` onto `writer`, returning the number of bytes written.
pub fn write_document<W: Write>(writer: &mut W, doc: &Document) -> SplitResult<usize> {
    let buf = encode(doc)?;
    writer.write_all(&buf)?;
    Ok(buf.len())
}

/// Cursor over one complete encoded document.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> SplitResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        let Some(end) = end else {
            return Err(SplitError::malformed(format!(
                "{what} at offset {} needs {n} bytes, {} remain",
                self.pos,
                self.buf.len() - self.pos
            )));
        };
        let buf = self.buf;
        let out = &buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self, what: &str) -> SplitResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn array<const N: usize>(&mut self, what: &str) -> SplitResult<[u8; N]> {
        let bytes = self.take(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn i32(&mut self, what: &str) -> SplitResult<i32> {
        self.array::<4>(what).map(i32::from_le_bytes)
    }

    fn cstring(&mut self) -> SplitResult<String> {
        let buf = self.buf;
        let rest = &buf[self.pos..];
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(SplitError::malformed(format!(
                "unterminated key at offset {}",
                self.pos
            )));
        };
        let key = std::str::from_utf8(&rest[..nul])
            .map_err(|e| SplitError::malformed(format!("key at offset {} is not UTF-8: {e}", self.pos)))?
            .to_string();
        self.pos += nul + 1;
        Ok(key)
    }

    /// Read the length-prefixed sub-document at the cursor and hand its
    /// element region (without prefix and terminator) to a fresh decoder.
    fn nested(&mut self, what: &str) -> SplitResult<Decoder<'a>> {
        let start = self.pos;
        let len = declared_length(self.array::<LENGTH_PREFIX_LEN>(what)?)?;
        self.pos = start;
        let whole = self.take(len, what)?;
        if whole[len - 1] != 0 {
            return Err(SplitError::malformed(format!(
                "{what} at offset {start} is missing its terminator"
            )));
        }
        Ok(Decoder::new(&whole[LENGTH_PREFIX_LEN..len - 1]))
    }

    fn document(&mut self, depth: usize) -> SplitResult<Document> {
        let mut inner = self.nested("document")?;
        inner.elements(depth)
    }

    fn elements(&mut self, depth: usize) -> SplitResult<Document> {
        if depth >= MAX_DEPTH {
            return Err(SplitError::malformed(format!(
                "document nested deeper than {MAX_DEPTH} levels"
            )));
        }
        let mut doc = Document::new();
        let mut seen = HashSet::new();
        while self.pos < self.buf.len() {
            let tag = self.byte("element tag")?;
            let key = self.cstring()?;
            let value = self.value(tag, &key, depth)?;
            if !seen.insert(key.clone()) {
                return Err(SplitError::malformed(format!("duplicate key {key:?}")));
            }
            doc.insert(key, value);
        }
        Ok(doc)
    }

    fn list(&mut self, depth: usize) -> SplitResult<Vec<Value>> {
        let mut inner = self.nested("list")?;
        let entries = inner.elements(depth)?;
        let mut items = Vec::with_capacity(entries.len());
        for (i, (key, value)) in entries.into_iter().enumerate() {
            if key != i.to_string() {
                return Err(SplitError::malformed(format!(
                    "list element {i} has key {key:?}"
                )));
            }
            items.push(value);
        }
        Ok(items)
    }

    fn value(&mut self, tag: u8, key: &str, depth: usize) -> SplitResult<Value> {
        Ok(match tag {
            TAG_NULL => Value::Null,
            TAG_BOOL => match self.byte("bool")? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(SplitError::malformed(format!(
                        "bool {key:?} has byte {other:#04x}"
                    )));
                }
            },
            TAG_INT32 => Value::Int32(self.i32("int32")?),
            TAG_INT64 => Value::Int64(i64::from_le_bytes(self.array::<8>("int64")?)),
            TAG_DOUBLE => Value::Double(f64::from_le_bytes(self.array::<8>("double")?)),
            TAG_STRING => {
                let len = self.i32("string length")?;
                let len = usize::try_from(len)
                    .ok()
                    .filter(|&l| l >= 1)
                    .ok_or_else(|| SplitError::malformed(format!("string {key:?} has length {len}")))?;
                let raw = self.take(len, "string")?;
                let (text, nul) = raw.split_at(len - 1);
                if nul != [0] {
                    return Err(SplitError::malformed(format!(
                        "string {key:?} length disagrees with its terminator"
                    )));
                }
                let text = std::str::from_utf8(text)
                    .map_err(|e| SplitError::malformed(format!("string {key:?} is not UTF-8: {e}")))?;
                Value::String(text.to_string())
            }
            TAG_BYTES => {
                let len = self.i32("bytes length")?;
                let len = usize::try_from(len)
                    .map_err(|_| SplitError::malformed(format!("bytes {key:?} has length {len}")))?;
                let subtype = self.byte("bytes subtype")?;
                if subtype != BYTES_SUBTYPE_GENERIC {
                    return Err(SplitError::malformed(format!(
                        "bytes {key:?} has unsupported subtype {subtype:#04x}"
                    )));
                }
                Value::Bytes(self.take(len, "bytes")?.to_vec())
            }
            TAG_DOCUMENT => Value::Document(self.document(depth + 1)?),
            TAG_LIST => Value::List(self.list(depth + 1)?),
            other => {
                return Err(SplitError::malformed(format!(
                    "unknown type tag {other:#04x} for key {key:?}"
                )));
            }
        })
    }
}
