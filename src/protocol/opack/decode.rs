use super::{OpackError, Value};

/// Decode a single value from the front of `data`
///
/// Trailing bytes after the value are ignored.
pub fn decode(data: &[u8]) -> Result<Value, OpackError> {
    let mut decoder = Decoder::new(data);
    decoder.decode_value()
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    /// Values recorded for back-reference resolution, in the same order the
    /// encoder recorded them
    object_list: Vec<Value>,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            object_list: Vec::new(),
        }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], OpackError> {
        if self.pos + count > self.data.len() {
            return Err(OpackError::UnexpectedEnd);
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn take_byte(&mut self) -> Result<u8, OpackError> {
        Ok(self.take(1)?[0])
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take_le_uint(&mut self, width: usize) -> Result<u64, OpackError> {
        let bytes = self.take(width)?;
        let mut value = 0u64;
        for (i, b) in bytes.iter().enumerate() {
            value |= u64::from(*b) << (8 * i);
        }
        Ok(value)
    }

    fn decode_value(&mut self) -> Result<Value, OpackError> {
        let tag = self.take_byte()?;

        let value = match tag {
            0x01 => Value::Bool(true),
            0x02 => Value::Bool(false),
            0x04 => Value::Null,
            0x05 => {
                let bytes = self.take(16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Value::Uuid(uuid)
            }
            0x06 => {
                let ts = self.take_le_uint(8)?;
                Value::Timestamp(ts)
            }
            // Inline integers, -1..=39 offset by 8
            0x07..=0x2F => Value::Int(i64::from(tag) - 8),
            0x30 => Value::Int(self.take_le_uint(1)? as i64),
            0x31 => Value::Int(self.take_le_uint(2)? as i64),
            0x32 => Value::Int(self.take_le_uint(4)? as i64),
            #[allow(clippy::cast_possible_wrap)]
            0x33 => Value::Int(self.take_le_uint(8)? as i64),
            0x35 => {
                let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
                Value::Float32(f32::from_le_bytes(bytes))
            }
            0x36 => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Value::Float64(f64::from_le_bytes(bytes))
            }
            0x40..=0x60 => self.decode_string(usize::from(tag - 0x40))?,
            0x61..=0x64 => {
                let width = usize::from(tag - 0x60);
                let len = self.take_le_uint(width)? as usize;
                self.decode_string(len)?
            }
            0x70..=0x90 => self.decode_bytes(usize::from(tag - 0x70))?,
            0x91..=0x94 => {
                let width = usize::from(tag - 0x90);
                let len = self.take_le_uint(width)? as usize;
                self.decode_bytes(len)?
            }
            0xA0..=0xC0 => return self.resolve_pointer(usize::from(tag - 0xA0)),
            0xC1..=0xC4 => {
                let width = usize::from(tag - 0xC0);
                let index = self.take_le_uint(width)? as usize;
                return self.resolve_pointer(index);
            }
            0xD0..=0xDE => {
                let count = usize::from(tag - 0xD0);
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.decode_value()?);
                }
                Value::Array(items)
            }
            0xDF => {
                let mut items = Vec::new();
                while self.peek() != Some(0x03) {
                    items.push(self.decode_value()?);
                }
                self.take_byte()?;
                Value::Array(items)
            }
            0xE0..=0xEE => {
                let count = usize::from(tag - 0xE0);
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self.decode_value()?;
                    let val = self.decode_value()?;
                    pairs.push((key, val));
                }
                Value::Dict(pairs)
            }
            0xEF => {
                let mut pairs = Vec::new();
                while self.peek() != Some(0x03) {
                    let key = self.decode_value()?;
                    let val = self.decode_value()?;
                    pairs.push((key, val));
                }
                self.take_byte()?;
                Value::Dict(pairs)
            }
            other => return Err(OpackError::InvalidTag(other)),
        };

        // Mirror the encoder's table population exactly: referenceable
        // values are appended in encounter order, pointers never are.
        if value.is_referenceable() {
            self.object_list.push(value.clone());
        }

        Ok(value)
    }

    fn decode_string(&mut self, len: usize) -> Result<Value, OpackError> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| OpackError::InvalidUtf8)?;
        Ok(Value::String(s.to_string()))
    }

    fn decode_bytes(&mut self, len: usize) -> Result<Value, OpackError> {
        let bytes = self.take(len)?;
        Ok(Value::Bytes(bytes.to_vec()))
    }

    fn resolve_pointer(&mut self, index: usize) -> Result<Value, OpackError> {
        self.object_list
            .get(index)
            .cloned()
            .ok_or(OpackError::InvalidPointer(index))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{DictBuilder, encode};
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(value: &Value) -> Value {
        decode(&encode(value).unwrap()).unwrap()
    }

    #[test]
    fn test_scalar_roundtrip() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(0),
            Value::Int(-1),
            Value::Int(39),
            Value::Int(40),
            Value::Int(0x1FF),
            Value::Int(-123_456),
            Value::Int(i64::MAX),
            Value::Float32(1.5),
            Value::Float64(-2.25),
            Value::string("hello"),
            Value::string(""),
            Value::bytes(vec![1, 2, 3]),
            Value::Uuid([7u8; 16]),
            Value::Timestamp(0xDEAD_BEEF),
        ] {
            assert_eq!(roundtrip(&value), value);
        }
    }

    #[test]
    fn test_nested_roundtrip() {
        let value = DictBuilder::new()
            .entry("_t", Value::Int(2))
            .entry("_i", Value::string("_launchApp"))
            .entry(
                "_c",
                DictBuilder::new()
                    .entry("_bundleID", Value::string("com.example.player"))
                    .build(),
            )
            .entry("_x", Value::Int(7777))
            .build();

        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_pointer_resolution() {
        let repeated = Value::string("identifier");
        let value = Value::Array(vec![repeated.clone(), repeated.clone(), repeated]);

        let encoded = encode(&value).unwrap();
        // Second and third occurrences are 1-byte pointers.
        assert_eq!(encoded.len(), 1 + (1 + 10) + 1 + 1);
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_large_containers_roundtrip() {
        let items: Vec<Value> = (0..40).map(Value::Int).collect();
        let array = Value::Array(items);
        assert_eq!(roundtrip(&array), array);

        let pairs: Vec<(Value, Value)> = (0..20)
            .map(|i| (Value::String(format!("k{i}")), Value::Int(i)))
            .collect();
        let dict = Value::Dict(pairs);
        assert_eq!(roundtrip(&dict), dict);
    }

    #[test]
    fn test_invalid_tag() {
        assert_eq!(decode(&[0x00]), Err(OpackError::InvalidTag(0x00)));
        assert_eq!(decode(&[0xFF]), Err(OpackError::InvalidTag(0xFF)));
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(decode(&[]), Err(OpackError::UnexpectedEnd));
        assert_eq!(decode(&[0x31, 0xFF]), Err(OpackError::UnexpectedEnd));
        assert_eq!(decode(&[0x45, b'a', b'b']), Err(OpackError::UnexpectedEnd));
        // Endless array missing its terminator
        assert_eq!(decode(&[0xDF, 0x08]), Err(OpackError::UnexpectedEnd));
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(decode(&[0x42, 0xFF, 0xFE]), Err(OpackError::InvalidUtf8));
    }

    #[test]
    fn test_dangling_pointer() {
        assert_eq!(decode(&[0xA5]), Err(OpackError::InvalidPointer(5)));
        assert_eq!(decode(&[0xC1, 0x30]), Err(OpackError::InvalidPointer(0x30)));
    }

    #[test]
    fn test_pointer_table_skips_inline_ints() {
        // [big, 5, big-again] - the inline 5 must not occupy a table slot
        let value = Value::Array(vec![Value::Int(1000), Value::Int(5), Value::Int(1000)]);
        let encoded = encode(&value).unwrap();
        assert_eq!(encoded, [0xD3, 0x31, 0xE8, 0x03, 0x0D, 0xA0]);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    proptest! {
        #[test]
        fn prop_int_roundtrip(v in any::<i64>()) {
            let value = Value::Int(v);
            prop_assert_eq!(roundtrip(&value), value);
        }

        #[test]
        fn prop_string_roundtrip(s in ".{0,300}") {
            let value = Value::string(s);
            prop_assert_eq!(roundtrip(&value), value);
        }

        #[test]
        fn prop_bytes_roundtrip(b in proptest::collection::vec(any::<u8>(), 0..600)) {
            let value = Value::bytes(b);
            prop_assert_eq!(roundtrip(&value), value);
        }
    }
}
