//! Self-describing documents: the value model, the binary codec and the serde
//! bridge.

pub mod codec;
pub mod ser;
pub mod value;

pub use codec::{
    LENGTH_PREFIX_LEN, MAX_DEPTH, MIN_DOCUMENT_LEN, decode, decode_prefix, encode, encode_into,
    peek_length, read_document, read_document_remainder, read_length_prefix, read_raw_document,
    write_document,
};
pub use ser::{from_document, to_document, to_value};
pub use value::{Document, Value};
