//! Serde bridge between Rust data and [`Value`]/[`Document`].
//!
//! Writing goes through a dedicated [`Serializer`] so unsupported shapes fail
//! with [`SplitError::UnsupportedType`] naming the offending type. Reading goes
//! back through the JSON data model.

use crate::document::value::{Document, Value};
use crate::error::{SplitError, SplitResult};
use serde::de::DeserializeOwned;
use serde::ser::{
    self, Serialize, SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant,
    SerializeTuple, SerializeTupleStruct, SerializeTupleVariant, Serializer,
};
use std::fmt::Display;

impl ser::Error for SplitError {
    fn custom<T: Display>(msg: T) -> Self {
        SplitError::UnsupportedType(msg.to_string())
    }
}

/// Convert any serializable value into a [`Value`].
///
/// # Errors
/// [`SplitError::UnsupportedType`] for integers outside the `i64` range,
/// non-string map keys and keys containing NUL bytes.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> SplitResult<Value> {
    value.serialize(ValueSerializer)
}

/// Convert a serializable value that maps to a key/value structure into a
/// [`Document`].
///
/// # Errors
/// As [`to_value`], plus [`SplitError::UnsupportedType`] when the value is not
/// a struct or map.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> SplitResult<Document> {
    match to_value(value)? {
        Value::Document(doc) => Ok(doc),
        other => Err(SplitError::unsupported(format!(
            "{} ({}) cannot be a top-level document",
            std::any::type_name::<T>(),
            other.type_name()
        ))),
    }
}

/// Deserialize a typed record from a document.
///
/// Goes through [`Value::to_json`], so byte blobs read back as sequences of
/// `u8` and non-finite doubles read back as `null`.
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> SplitResult<T> {
    serde_json::from_value(doc.to_json()).map_err(|e| {
        SplitError::unsupported(format!(
            "cannot read {} from document: {e}",
            std::any::type_name::<T>()
        ))
    })
}

fn int_from_u64(v: u64, type_name: &str) -> SplitResult<Value> {
    if let Ok(small) = i32::try_from(v) {
        Ok(Value::Int32(small))
    } else if let Ok(wide) = i64::try_from(v) {
        Ok(Value::Int64(wide))
    } else {
        Err(SplitError::unsupported(format!(
            "{type_name} value {v} exceeds the i64 range"
        )))
    }
}

fn checked_key(key: String) -> SplitResult<String> {
    if key.contains('\0') {
        Err(SplitError::unsupported(format!("key {key:?} contains a NUL byte")))
    } else {
        Ok(key)
    }
}

fn tagged(variant: &'static str, value: Value) -> Value {
    Value::Document(Document::new().with(variant, value))
}

struct ValueSerializer;

impl Serializer for ValueSerializer {
    type Ok = Value;
    type Error = SplitError;
    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = SeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = MapBuilder;

    fn serialize_bool(self, v: bool) -> SplitResult<Value> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> SplitResult<Value> {
        Ok(Value::Int32(i32::from(v)))
    }

    fn serialize_i16(self, v: i16) -> SplitResult<Value> {
        Ok(Value::Int32(i32::from(v)))
    }

    fn serialize_i32(self, v: i32) -> SplitResult<Value> {
        Ok(Value::Int32(v))
    }

    fn serialize_i64(self, v: i64) -> SplitResult<Value> {
        Ok(Value::Int64(v))
    }

    fn serialize_i128(self, v: i128) -> SplitResult<Value> {
        i64::try_from(v)
            .map(Value::Int64)
            .map_err(|_| SplitError::unsupported(format!("i128 value {v} exceeds the i64 range")))
    }

    fn serialize_u8(self, v: u8) -> SplitResult<Value> {
        Ok(Value::Int32(i32::from(v)))
    }

    fn serialize_u16(self, v: u16) -> SplitResult<Value> {
        Ok(Value::Int32(i32::from(v)))
    }

    fn serialize_u32(self, v: u32) -> SplitResult<Value> {
        int_from_u64(u64::from(v), "u32")
    }

    fn serialize_u64(self, v: u64) -> SplitResult<Value> {
        int_from_u64(v, "u64")
    }

    fn serialize_u128(self, v: u128) -> SplitResult<Value> {
        u64::try_from(v)
            .map_err(|_| SplitError::unsupported(format!("u128 value {v} exceeds the i64 range")))
            .and_then(|v| int_from_u64(v, "u128"))
    }

    fn serialize_f32(self, v: f32) -> SplitResult<Value> {
        Ok(Value::Double(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> SplitResult<Value> {
        Ok(Value::Double(v))
    }

    fn serialize_char(self, v: char) -> SplitResult<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> SplitResult<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> SplitResult<Value> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> SplitResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> SplitResult<Value> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> SplitResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> SplitResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> SplitResult<Value> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> SplitResult<Value> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> SplitResult<Value> {
        Ok(tagged(variant, value.serialize(self)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> SplitResult<SeqBuilder> {
        Ok(SeqBuilder::new(len, None))
    }

    fn serialize_tuple(self, len: usize) -> SplitResult<SeqBuilder> {
        Ok(SeqBuilder::new(Some(len), None))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> SplitResult<SeqBuilder> {
        Ok(SeqBuilder::new(Some(len), None))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> SplitResult<SeqBuilder> {
        Ok(SeqBuilder::new(Some(len), Some(variant)))
    }

    fn serialize_map(self, len: Option<usize>) -> SplitResult<MapBuilder> {
        Ok(MapBuilder::new(len, None))
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> SplitResult<MapBuilder> {
        Ok(MapBuilder::new(Some(len), None))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> SplitResult<MapBuilder> {
        Ok(MapBuilder::new(Some(len), Some(variant)))
    }
}

struct SeqBuilder {
    items: Vec<Value>,
    variant: Option<&'static str>,
}

impl SeqBuilder {
    fn new(len: Option<usize>, variant: Option<&'static str>) -> Self {
        Self {
            items: Vec::with_capacity(len.unwrap_or(0)),
            variant,
        }
    }

    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> SplitResult<()> {
        self.items.push(to_value(value)?);
        Ok(())
    }

    fn finish(self) -> Value {
        let list = Value::List(self.items);
        match self.variant {
            Some(variant) => tagged(variant, list),
            None => list,
        }
    }
}

impl SerializeSeq for SeqBuilder {
    type Ok = Value;
    type Error = SplitError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> SplitResult<()> {
        self.push(value)
    }

    fn end(self) -> SplitResult<Value> {
        Ok(self.finish())
    }
}

impl SerializeTuple for SeqBuilder {
    type Ok = Value;
    type Error = SplitError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> SplitResult<()> {
        self.push(value)
    }

    fn end(self) -> SplitResult<Value> {
        Ok(self.finish())
    }
}

impl SerializeTupleStruct for SeqBuilder {
    type Ok = Value;
    type Error = SplitError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> SplitResult<()> {
        self.push(value)
    }

    fn end(self) -> SplitResult<Value> {
        Ok(self.finish())
    }
}

impl SerializeTupleVariant for SeqBuilder {
    type Ok = Value;
    type Error = SplitError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> SplitResult<()> {
        self.push(value)
    }

    fn end(self) -> SplitResult<Value> {
        Ok(self.finish())
    }
}

struct MapBuilder {
    doc: Document,
    pending_key: Option<String>,
    variant: Option<&'static str>,
}

impl MapBuilder {
    fn new(len: Option<usize>, variant: Option<&'static str>) -> Self {
        Self {
            doc: Document::with_capacity(len.unwrap_or(0)),
            pending_key: None,
            variant,
        }
    }

    fn field<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> SplitResult<()> {
        let key = checked_key(key.to_string())?;
        self.doc.insert(key, to_value(value)?);
        Ok(())
    }

    fn finish(self) -> Value {
        let doc = Value::Document(self.doc);
        match self.variant {
            Some(variant) => tagged(variant, doc),
            None => doc,
        }
    }
}

impl SerializeMap for MapBuilder {
    type Ok = Value;
    type Error = SplitError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> SplitResult<()> {
        let key = match to_value(key)? {
            Value::String(s) => checked_key(s)?,
            other => {
                return Err(SplitError::unsupported(format!(
                    "map key of type {} (keys must be strings)",
                    other.type_name()
                )));
            }
        };
        self.pending_key = Some(key);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> SplitResult<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| SplitError::unsupported("map value without a key"))?;
        self.doc.insert(key, to_value(value)?);
        Ok(())
    }

    fn end(self) -> SplitResult<Value> {
        Ok(self.finish())
    }
}

impl SerializeStruct for MapBuilder {
    type Ok = Value;
    type Error = SplitError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> SplitResult<()> {
        self.field(key, value)
    }

    fn end(self) -> SplitResult<Value> {
        Ok(self.finish())
    }
}

impl SerializeStructVariant for MapBuilder {
    type Ok = Value;
    type Error = SplitError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> SplitResult<()> {
        self.field(key, value)
    }

    fn end(self) -> SplitResult<Value> {
        Ok(self.finish())
    }
}
