//! Binary property-list codec
//!
//! Covers the plain binary plist bodies used by the AirPlay control channel
//! (SETUP, stream descriptors) and, via [`archive::KeyedArchive`], the
//! archived-object form whose containers reference members by true UID
//! back-references. The device's un-archiver distinguishes UID objects from
//! plain integers, so UIDs are a first-class value kind here.

pub mod archive;
pub mod decode;
pub mod encode;

pub use archive::KeyedArchive;
pub use decode::{PlistDecodeError, decode};
pub use encode::{PlistEncodeError, encode};

use std::collections::HashMap;

/// A property list value
#[derive(Debug, Clone, PartialEq)]
pub enum PlistValue {
    /// Boolean value
    Boolean(bool),

    /// Signed integer (up to 64 bits)
    Integer(i64),

    /// Unsigned integer for values above `i64::MAX`
    UnsignedInteger(u64),

    /// Floating point number
    Real(f64),

    /// UTF-8 string
    String(String),

    /// Binary data
    Data(Vec<u8>),

    /// Date as seconds since 2001-01-01 00:00:00 UTC
    Date(f64),

    /// Array of values
    Array(Vec<PlistValue>),

    /// Dictionary (key-value pairs)
    Dictionary(HashMap<String, PlistValue>),

    /// UID back-reference into the archive object table
    Uid(u64),
}

impl PlistValue {
    /// Build a dictionary from string-keyed entries
    pub fn dict<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, PlistValue)>,
    {
        PlistValue::Dictionary(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    /// Convenience constructor for string values
    pub fn string(s: impl Into<String>) -> Self {
        PlistValue::String(s.into())
    }

    /// Try to get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlistValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PlistValue::Integer(i) => Some(*i),
            PlistValue::UnsignedInteger(u) => (*u).try_into().ok(),
            _ => None,
        }
    }

    /// Try to get as u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PlistValue::Integer(i) => (*i).try_into().ok(),
            PlistValue::UnsignedInteger(u) => Some(*u),
            _ => None,
        }
    }

    /// Try to get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as byte slice
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PlistValue::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get as array slice
    pub fn as_array(&self) -> Option<&[PlistValue]> {
        match self {
            PlistValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get as dictionary reference
    pub fn as_dictionary(&self) -> Option<&HashMap<String, PlistValue>> {
        match self {
            PlistValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a dictionary entry
    pub fn get(&self, key: &str) -> Option<&PlistValue> {
        self.as_dictionary().and_then(|d| d.get(key))
    }
}
