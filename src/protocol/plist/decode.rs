use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::PlistValue;

/// Errors that can occur during plist decoding
#[derive(Debug, Error)]
pub enum PlistDecodeError {
    #[error("invalid magic header")]
    InvalidMagic,

    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("invalid trailer")]
    InvalidTrailer,

    #[error("invalid object marker: 0x{0:02x}")]
    InvalidObjectMarker(u8),

    #[error("invalid object index: {0}")]
    InvalidObjectIndex(u64),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("dictionary key is not a string")]
    NonStringKey,

    #[error("circular reference detected")]
    CircularReference,

    #[error("integer overflow")]
    IntegerOverflow,
}

/// Decode binary plist data into a `PlistValue`
pub fn decode(data: &[u8]) -> Result<PlistValue, PlistDecodeError> {
    if data.len() < 8 + 32 {
        return Err(PlistDecodeError::BufferTooSmall {
            needed: 40,
            have: data.len(),
        });
    }
    if &data[..8] != b"bplist00" {
        return Err(PlistDecodeError::InvalidMagic);
    }

    let trailer = &data[data.len() - 32..];
    let offset_size = trailer[6] as usize;
    let ref_size = trailer[7] as usize;
    let num_objects = u64::from_be_bytes(trailer[8..16].try_into().unwrap());
    let root_index = u64::from_be_bytes(trailer[16..24].try_into().unwrap());
    let table_offset = u64::from_be_bytes(trailer[24..32].try_into().unwrap());

    if !matches!(offset_size, 1 | 2 | 4 | 8) || !matches!(ref_size, 1 | 2 | 4 | 8) {
        return Err(PlistDecodeError::InvalidTrailer);
    }

    let count = usize::try_from(num_objects).map_err(|_| PlistDecodeError::InvalidTrailer)?;
    let table_start =
        usize::try_from(table_offset).map_err(|_| PlistDecodeError::InvalidTrailer)?;
    let table_end = table_start
        .checked_add(count * offset_size)
        .ok_or(PlistDecodeError::InvalidTrailer)?;
    if table_end > data.len() {
        return Err(PlistDecodeError::BufferTooSmall {
            needed: table_end,
            have: data.len(),
        });
    }

    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let at = table_start + i * offset_size;
        offsets.push(read_be_uint(&data[at..at + offset_size]));
    }

    let reader = Reader {
        data,
        offsets,
        ref_size,
    };
    reader.read_object(root_index, &mut HashSet::new())
}

fn read_be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

struct Reader<'a> {
    data: &'a [u8],
    offsets: Vec<u64>,
    ref_size: usize,
}

impl Reader<'_> {
    fn slice(&self, start: usize, len: usize) -> Result<&[u8], PlistDecodeError> {
        let end = start
            .checked_add(len)
            .ok_or(PlistDecodeError::IntegerOverflow)?;
        if end > self.data.len() {
            return Err(PlistDecodeError::BufferTooSmall {
                needed: end,
                have: self.data.len(),
            });
        }
        Ok(&self.data[start..end])
    }

    fn read_object(
        &self,
        index: u64,
        visiting: &mut HashSet<u64>,
    ) -> Result<PlistValue, PlistDecodeError> {
        if !visiting.insert(index) {
            return Err(PlistDecodeError::CircularReference);
        }

        let slot = usize::try_from(index).map_err(|_| PlistDecodeError::InvalidObjectIndex(index))?;
        let offset = *self
            .offsets
            .get(slot)
            .ok_or(PlistDecodeError::InvalidObjectIndex(index))?;
        let pos =
            usize::try_from(offset).map_err(|_| PlistDecodeError::InvalidObjectIndex(index))?;

        let marker = *self
            .data
            .get(pos)
            .ok_or(PlistDecodeError::InvalidObjectIndex(index))?;
        let value = self.read_value(marker, pos + 1, visiting)?;

        visiting.remove(&index);
        Ok(value)
    }

    fn read_value(
        &self,
        marker: u8,
        pos: usize,
        visiting: &mut HashSet<u64>,
    ) -> Result<PlistValue, PlistDecodeError> {
        let kind = marker >> 4;
        let nibble = marker & 0x0F;

        match kind {
            0x0 => match nibble {
                0x0 | 0xF => Ok(PlistValue::Data(vec![])),
                0x8 => Ok(PlistValue::Boolean(false)),
                0x9 => Ok(PlistValue::Boolean(true)),
                _ => Err(PlistDecodeError::InvalidObjectMarker(marker)),
            },
            0x1 => self.read_integer(pos, nibble),
            0x2 => self.read_real(pos, nibble),
            0x3 => {
                let bytes = self.slice(pos, 8)?;
                Ok(PlistValue::Date(f64::from_be_bytes(
                    bytes.try_into().unwrap(),
                )))
            }
            0x4 => {
                let (len, start) = self.read_length(pos, nibble)?;
                Ok(PlistValue::Data(self.slice(start, len)?.to_vec()))
            }
            0x5 => {
                let (len, start) = self.read_length(pos, nibble)?;
                let s = std::str::from_utf8(self.slice(start, len)?)
                    .map_err(|_| PlistDecodeError::InvalidUtf8)?;
                Ok(PlistValue::String(s.to_string()))
            }
            0x6 => {
                let (len, start) = self.read_length(pos, nibble)?;
                let bytes = self.slice(start, len * 2)?;
                let u16s: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes(c.try_into().unwrap()))
                    .collect();
                let s =
                    String::from_utf16(&u16s).map_err(|_| PlistDecodeError::InvalidUtf8)?;
                Ok(PlistValue::String(s))
            }
            0x8 => {
                let width = usize::from(nibble) + 1;
                Ok(PlistValue::Uid(read_be_uint(self.slice(pos, width)?)))
            }
            0xA => {
                let (count, start) = self.read_length(pos, nibble)?;
                let refs = self.slice(start, count * self.ref_size)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let index = read_be_uint(&refs[i * self.ref_size..(i + 1) * self.ref_size]);
                    items.push(self.read_object(index, visiting)?);
                }
                Ok(PlistValue::Array(items))
            }
            0xD => {
                let (count, start) = self.read_length(pos, nibble)?;
                let refs = self.slice(start, count * 2 * self.ref_size)?;
                let mut dict = HashMap::with_capacity(count);
                for i in 0..count {
                    let key_index =
                        read_be_uint(&refs[i * self.ref_size..(i + 1) * self.ref_size]);
                    let val_index = read_be_uint(
                        &refs[(count + i) * self.ref_size..(count + i + 1) * self.ref_size],
                    );

                    let PlistValue::String(key) = self.read_object(key_index, visiting)? else {
                        return Err(PlistDecodeError::NonStringKey);
                    };
                    dict.insert(key, self.read_object(val_index, visiting)?);
                }
                Ok(PlistValue::Dictionary(dict))
            }
            _ => Err(PlistDecodeError::InvalidObjectMarker(marker)),
        }
    }

    fn read_integer(&self, pos: usize, size_exp: u8) -> Result<PlistValue, PlistDecodeError> {
        let width = 1usize << size_exp;
        let bytes = self.slice(pos, width)?;

        match width {
            #[allow(clippy::cast_possible_wrap)]
            1 => Ok(PlistValue::Integer(i64::from(bytes[0] as i8))),
            2 => Ok(PlistValue::Integer(i64::from(i16::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            4 => Ok(PlistValue::Integer(i64::from(i32::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            8 => Ok(PlistValue::Integer(i64::from_be_bytes(
                bytes.try_into().unwrap(),
            ))),
            16 => {
                let val = u128::from_be_bytes(bytes.try_into().unwrap());
                u64::try_from(val)
                    .map(PlistValue::UnsignedInteger)
                    .map_err(|_| PlistDecodeError::IntegerOverflow)
            }
            _ => Err(PlistDecodeError::IntegerOverflow),
        }
    }

    fn read_real(&self, pos: usize, size_exp: u8) -> Result<PlistValue, PlistDecodeError> {
        let width = 1usize << size_exp;
        let bytes = self.slice(pos, width)?;

        match width {
            4 => Ok(PlistValue::Real(f64::from(f32::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            8 => Ok(PlistValue::Real(f64::from_be_bytes(
                bytes.try_into().unwrap(),
            ))),
            _ => Err(PlistDecodeError::InvalidObjectMarker(0x20 | size_exp)),
        }
    }

    /// Inline length nibble, or 0xF followed by an integer object
    fn read_length(&self, pos: usize, nibble: u8) -> Result<(usize, usize), PlistDecodeError> {
        if nibble != 0xF {
            return Ok((usize::from(nibble), pos));
        }

        let marker = *self
            .data
            .get(pos)
            .ok_or(PlistDecodeError::BufferTooSmall {
                needed: pos + 1,
                have: self.data.len(),
            })?;
        if marker >> 4 != 0x1 {
            return Err(PlistDecodeError::InvalidObjectMarker(marker));
        }

        let width = 1usize << (marker & 0x0F);
        if width > 8 {
            return Err(PlistDecodeError::IntegerOverflow);
        }
        let value = read_be_uint(self.slice(pos + 1, width)?);
        let len = usize::try_from(value).map_err(|_| PlistDecodeError::IntegerOverflow)?;
        Ok((len, pos + 1 + width))
    }
}
