//! Self-describing binary value codec used for Companion link envelopes
//!
//! Values serialize to a compact tagged form with a shared back-reference
//! table: strings, byte-strings, UUIDs, timestamps and wide integers are
//! recorded in encounter order on both sides, and repeats are written as
//! pointers into that table. Encoder and decoder must populate the table
//! identically or pointer resolution breaks.

pub mod decode;
pub mod encode;

pub use decode::decode;
pub use encode::encode;

use thiserror::Error;

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpackError {
    #[error("invalid tag: 0x{0:02x}")]
    InvalidTag(u8),

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid back-reference: {0}")]
    InvalidPointer(usize),
}

/// A decoded or to-be-encoded value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// Raw byte string
    Bytes(Vec<u8>),
    /// 16-byte UUID
    Uuid([u8; 16]),
    /// 64-bit timestamp
    Timestamp(u64),
    /// Ordered list of values
    Array(Vec<Value>),
    /// Ordered list of key-value pairs
    Dict(Vec<(Value, Value)>),
}

impl Value {
    /// Convenience constructor for string values
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Convenience constructor for byte-string values
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(b.into())
    }

    /// Look up a dictionary entry by string key
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(pairs) => pairs.iter().find_map(|(k, v)| match k {
                Value::String(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Get as i64 if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as string slice if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as byte slice if this is a byte string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get as bool if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True if this value kind participates in the back-reference table
    ///
    /// Only non-empty strings and byte-strings, UUIDs, timestamps and
    /// integers outside the inline range are recorded.
    pub(crate) fn is_referenceable(&self) -> bool {
        match self {
            Value::String(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Uuid(_) | Value::Timestamp(_) => true,
            Value::Int(i) => !(-1..=39).contains(i),
            _ => false,
        }
    }
}

/// Builder for dictionary values in insertion order
#[derive(Debug, Default)]
pub struct DictBuilder {
    pairs: Vec<(Value, Value)>,
}

impl DictBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a string-keyed entry
    #[must_use]
    pub fn entry(mut self, key: &str, value: Value) -> Self {
        self.pairs.push((Value::string(key), value));
        self
    }

    /// Finish into a dictionary value
    #[must_use]
    pub fn build(self) -> Value {
        Value::Dict(self.pairs)
    }
}
