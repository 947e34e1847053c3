use std::collections::HashMap;

use thiserror::Error;

use super::PlistValue;

/// Errors that can occur during plist encoding
#[derive(Debug, Error)]
pub enum PlistEncodeError {
    #[error("too many objects: {0}")]
    TooManyObjects(usize),
}

/// Encode a `PlistValue` to binary plist format
///
/// The writer flattens the value into an object table first, then picks the
/// smallest reference width that can address every slot, so container bodies
/// carry minimal-width back-reference indices.
pub fn encode(value: &PlistValue) -> Result<Vec<u8>, PlistEncodeError> {
    let mut graph = ObjectGraph::default();
    let root = graph.add(value)?;
    Ok(graph.serialize(root))
}

/// Flattened object: scalars keep their value, containers hold child indices
enum FlatObject {
    Scalar(PlistValue),
    Array(Vec<usize>),
    Dictionary(Vec<(usize, usize)>),
}

/// Cache key for primitive deduplication (float bits for hashability)
#[derive(Hash, Eq, PartialEq)]
enum CacheKey {
    Boolean(bool),
    Integer(i64),
    UnsignedInteger(u64),
    Real(u64),
    String(String),
    Data(Vec<u8>),
    Date(u64),
    Uid(u64),
}

impl CacheKey {
    fn from_value(value: &PlistValue) -> Option<Self> {
        match value {
            PlistValue::Boolean(b) => Some(Self::Boolean(*b)),
            PlistValue::Integer(i) => Some(Self::Integer(*i)),
            PlistValue::UnsignedInteger(u) => Some(Self::UnsignedInteger(*u)),
            PlistValue::Real(f) => Some(Self::Real(f.to_bits())),
            PlistValue::String(s) => Some(Self::String(s.clone())),
            PlistValue::Data(d) => Some(Self::Data(d.clone())),
            PlistValue::Date(d) => Some(Self::Date(d.to_bits())),
            PlistValue::Uid(u) => Some(Self::Uid(*u)),
            PlistValue::Array(_) | PlistValue::Dictionary(_) => None,
        }
    }
}

#[derive(Default)]
struct ObjectGraph {
    objects: Vec<FlatObject>,
    cache: HashMap<CacheKey, usize>,
}

impl ObjectGraph {
    /// Flatten a value into the object table, returning its slot index
    fn add(&mut self, value: &PlistValue) -> Result<usize, PlistEncodeError> {
        if let Some(key) = CacheKey::from_value(value) {
            if let Some(&index) = self.cache.get(&key) {
                return Ok(index);
            }
            let index = self.reserve();
            self.objects[index] = FlatObject::Scalar(value.clone());
            self.cache.insert(key, index);
            return Ok(index);
        }

        match value {
            PlistValue::Array(items) => {
                let index = self.reserve();
                let mut refs = Vec::with_capacity(items.len());
                for item in items {
                    refs.push(self.add(item)?);
                }
                self.objects[index] = FlatObject::Array(refs);
                Ok(index)
            }
            PlistValue::Dictionary(dict) => {
                let index = self.reserve();
                // Sort keys so output is deterministic
                let mut keys: Vec<&String> = dict.keys().collect();
                keys.sort();

                let mut refs = Vec::with_capacity(dict.len());
                for key in keys {
                    let key_ref = self.add(&PlistValue::String(key.clone()))?;
                    let val_ref = self.add(&dict[key])?;
                    refs.push((key_ref, val_ref));
                }
                self.objects[index] = FlatObject::Dictionary(refs);
                Ok(index)
            }
            _ => unreachable!("scalars handled above"),
        }
    }

    fn reserve(&mut self) -> usize {
        self.objects.push(FlatObject::Scalar(PlistValue::Boolean(false)));
        self.objects.len() - 1
    }

    fn ref_size(&self) -> usize {
        match self.objects.len() {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            _ => 4,
        }
    }

    fn serialize(&self, root: usize) -> Vec<u8> {
        let ref_size = self.ref_size();

        let mut output = Vec::new();
        output.extend_from_slice(b"bplist00");

        let mut offsets = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            offsets.push(output.len() as u64);
            match object {
                FlatObject::Scalar(value) => write_scalar(&mut output, value),
                FlatObject::Array(refs) => {
                    write_container_header(&mut output, 0xA, refs.len());
                    for &r in refs {
                        write_ref(&mut output, r, ref_size);
                    }
                }
                FlatObject::Dictionary(refs) => {
                    write_container_header(&mut output, 0xD, refs.len());
                    for &(k, _) in refs {
                        write_ref(&mut output, k, ref_size);
                    }
                    for &(_, v) in refs {
                        write_ref(&mut output, v, ref_size);
                    }
                }
            }
        }

        let offset_table_offset = output.len();
        let offset_size = minimal_width(offset_table_offset as u64);
        for &offset in &offsets {
            write_sized_be(&mut output, offset, offset_size);
        }

        // 32-byte trailer
        output.extend_from_slice(&[0; 5]);
        output.push(0); // sort version
        #[allow(clippy::cast_possible_truncation)]
        output.push(offset_size as u8);
        #[allow(clippy::cast_possible_truncation)]
        output.push(ref_size as u8);
        output.extend_from_slice(&(self.objects.len() as u64).to_be_bytes());
        output.extend_from_slice(&(root as u64).to_be_bytes());
        output.extend_from_slice(&(offset_table_offset as u64).to_be_bytes());

        output
    }
}

fn write_scalar(output: &mut Vec<u8>, value: &PlistValue) {
    match value {
        PlistValue::Boolean(false) => output.push(0x08),
        PlistValue::Boolean(true) => output.push(0x09),
        PlistValue::Integer(i) => write_integer(output, *i),
        PlistValue::UnsignedInteger(u) => {
            #[allow(clippy::cast_possible_wrap)]
            if *u <= i64::MAX as u64 {
                write_integer(output, *u as i64);
            } else {
                // 16-byte form keeps the value positive on decode
                output.push(0x14);
                output.extend_from_slice(&[0u8; 8]);
                output.extend_from_slice(&u.to_be_bytes());
            }
        }
        PlistValue::Real(f) => {
            output.push(0x23);
            output.extend_from_slice(&f.to_be_bytes());
        }
        PlistValue::Date(d) => {
            output.push(0x33);
            output.extend_from_slice(&d.to_be_bytes());
        }
        PlistValue::String(s) => {
            if s.is_ascii() {
                write_container_header(output, 0x5, s.len());
                output.extend_from_slice(s.as_bytes());
            } else {
                let u16s: Vec<u16> = s.encode_utf16().collect();
                write_container_header(output, 0x6, u16s.len());
                for c in u16s {
                    output.extend_from_slice(&c.to_be_bytes());
                }
            }
        }
        PlistValue::Data(d) => {
            write_container_header(output, 0x4, d.len());
            output.extend_from_slice(d);
        }
        PlistValue::Uid(u) => {
            let width = minimal_width(*u);
            #[allow(clippy::cast_possible_truncation)]
            output.push(0x80 | (width - 1) as u8);
            write_sized_be(output, *u, width);
        }
        PlistValue::Array(_) | PlistValue::Dictionary(_) => {
            unreachable!("containers serialized from the flattened table")
        }
    }
}

fn write_integer(output: &mut Vec<u8>, value: i64) {
    if value < 0 {
        // Negative integers always use the 8-byte form
        output.push(0x13);
        output.extend_from_slice(&value.to_be_bytes());
    } else if value <= 0xFF {
        output.push(0x10);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        output.push(value as u8);
    } else if value <= 0xFFFF {
        output.push(0x11);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        output.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= 0xFFFF_FFFF {
        output.push(0x12);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        output.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        output.push(0x13);
        output.extend_from_slice(&value.to_be_bytes());
    }
}

/// Marker byte with inline length nibble, or 0xF plus an integer object
fn write_container_header(output: &mut Vec<u8>, kind: u8, len: usize) {
    if len < 0xF {
        #[allow(clippy::cast_possible_truncation)]
        output.push((kind << 4) | len as u8);
    } else {
        output.push((kind << 4) | 0xF);
        write_integer(output, len as i64);
    }
}

fn write_ref(output: &mut Vec<u8>, index: usize, ref_size: usize) {
    write_sized_be(output, index as u64, ref_size);
}

fn write_sized_be(output: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_be_bytes();
    output.extend_from_slice(&bytes[8 - width..]);
}

fn minimal_width(value: u64) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFFFF_FFFF => 4,
        _ => 8,
    }
}
