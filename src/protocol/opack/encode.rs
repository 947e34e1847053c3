use super::{OpackError, Value};

/// Encode a value to its binary form
pub fn encode(value: &Value) -> Result<Vec<u8>, OpackError> {
    let mut output = Vec::new();
    let mut object_list: Vec<Value> = Vec::new();
    encode_value(value, &mut output, &mut object_list)?;
    Ok(output)
}

fn encode_value(
    value: &Value,
    output: &mut Vec<u8>,
    object_list: &mut Vec<Value>,
) -> Result<(), OpackError> {
    // Repeated referenceable values are written as pointers into the table.
    if value.is_referenceable() {
        if let Some(index) = object_list.iter().position(|v| v == value) {
            return encode_pointer(index, output);
        }
    }

    match value {
        Value::Bool(true) => output.push(0x01),
        Value::Bool(false) => output.push(0x02),
        Value::Null => output.push(0x04),
        Value::Uuid(bytes) => {
            output.push(0x05);
            output.extend_from_slice(bytes);
        }
        Value::Timestamp(ts) => {
            output.push(0x06);
            output.extend_from_slice(&ts.to_le_bytes());
        }
        Value::Int(i) => encode_int(*i, output),
        Value::Float32(f) => {
            output.push(0x35);
            output.extend_from_slice(&f.to_le_bytes());
        }
        Value::Float64(f) => {
            output.push(0x36);
            output.extend_from_slice(&f.to_le_bytes());
        }
        Value::String(s) => encode_sized(0x40, 0x61, s.as_bytes(), output),
        Value::Bytes(b) => encode_sized(0x70, 0x91, b, output),
        Value::Array(items) => {
            if items.len() < 0xF {
                #[allow(clippy::cast_possible_truncation)]
                output.push(0xD0 + items.len() as u8);
                for item in items {
                    encode_value(item, output, object_list)?;
                }
            } else {
                output.push(0xDF);
                for item in items {
                    encode_value(item, output, object_list)?;
                }
                output.push(0x03);
            }
        }
        Value::Dict(pairs) => {
            if pairs.len() < 0xF {
                #[allow(clippy::cast_possible_truncation)]
                output.push(0xE0 + pairs.len() as u8);
                for (key, val) in pairs {
                    encode_value(key, output, object_list)?;
                    encode_value(val, output, object_list)?;
                }
            } else {
                output.push(0xEF);
                for (key, val) in pairs {
                    encode_value(key, output, object_list)?;
                    encode_value(val, output, object_list)?;
                }
                output.push(0x03);
            }
        }
    }

    if value.is_referenceable() {
        object_list.push(value.clone());
    }

    Ok(())
}

fn encode_int(value: i64, output: &mut Vec<u8>) {
    if (-1..=39).contains(&value) {
        // Inline: tag byte carries the value, -1 maps to 0x07.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        output.push((value + 8) as u8);
    } else if (0..=0xFF).contains(&value) {
        output.push(0x30);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        output.push(value as u8);
    } else if (0..=0xFFFF).contains(&value) {
        output.push(0x31);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        output.extend_from_slice(&(value as u16).to_le_bytes());
    } else if (0..=0xFFFF_FFFF).contains(&value) {
        output.push(0x32);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        output.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        output.push(0x33);
        output.extend_from_slice(&value.to_le_bytes());
    }
}

/// Strings and byte-strings share the length scheme: an inline-length tag
/// for up to 32 bytes, then explicit 1/2/3/4-byte little-endian lengths.
fn encode_sized(inline_base: u8, explicit_base: u8, data: &[u8], output: &mut Vec<u8>) {
    let len = data.len();
    if len <= 0x20 {
        #[allow(clippy::cast_possible_truncation)]
        output.push(inline_base + len as u8);
    } else if len <= 0xFF {
        output.push(explicit_base);
        #[allow(clippy::cast_possible_truncation)]
        output.push(len as u8);
    } else if len <= 0xFFFF {
        output.push(explicit_base + 1);
        #[allow(clippy::cast_possible_truncation)]
        output.extend_from_slice(&(len as u16).to_le_bytes());
    } else if len <= 0xFF_FFFF {
        output.push(explicit_base + 2);
        #[allow(clippy::cast_possible_truncation)]
        output.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
    } else {
        output.push(explicit_base + 3);
        #[allow(clippy::cast_possible_truncation)]
        output.extend_from_slice(&(len as u32).to_le_bytes());
    }
    output.extend_from_slice(data);
}

fn encode_pointer(index: usize, output: &mut Vec<u8>) -> Result<(), OpackError> {
    if index <= 0x20 {
        #[allow(clippy::cast_possible_truncation)]
        output.push(0xA0 + index as u8);
    } else if index <= 0xFF {
        output.push(0xC1);
        #[allow(clippy::cast_possible_truncation)]
        output.push(index as u8);
    } else if index <= 0xFFFF {
        output.push(0xC2);
        #[allow(clippy::cast_possible_truncation)]
        output.extend_from_slice(&(index as u16).to_le_bytes());
    } else if index <= 0xFF_FFFF {
        output.push(0xC3);
        #[allow(clippy::cast_possible_truncation)]
        output.extend_from_slice(&(index as u32).to_le_bytes()[..3]);
    } else {
        output.push(0xC4);
        #[allow(clippy::cast_possible_truncation)]
        output.extend_from_slice(&(index as u32).to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singletons() {
        assert_eq!(encode(&Value::Bool(true)).unwrap(), [0x01]);
        assert_eq!(encode(&Value::Bool(false)).unwrap(), [0x02]);
        assert_eq!(encode(&Value::Null).unwrap(), [0x04]);
    }

    #[test]
    fn test_inline_ints() {
        assert_eq!(encode(&Value::Int(0)).unwrap(), [0x08]);
        assert_eq!(encode(&Value::Int(-1)).unwrap(), [0x07]);
        assert_eq!(encode(&Value::Int(39)).unwrap(), [0x2F]);
    }

    #[test]
    fn test_wide_ints() {
        assert_eq!(encode(&Value::Int(40)).unwrap(), [0x30, 0x28]);
        assert_eq!(encode(&Value::Int(0x1FF)).unwrap(), [0x31, 0xFF, 0x01]);
        assert_eq!(
            encode(&Value::Int(0x1_0000)).unwrap(),
            [0x32, 0x00, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn test_short_string() {
        assert_eq!(encode(&Value::string("ab")).unwrap(), [0x42, b'a', b'b']);
        assert_eq!(encode(&Value::string("")).unwrap(), [0x40]);
    }

    #[test]
    fn test_long_string_explicit_length() {
        let s = "x".repeat(33);
        let encoded = encode(&Value::string(&s)).unwrap();
        assert_eq!(encoded[0], 0x61);
        assert_eq!(encoded[1], 33);
        assert_eq!(encoded.len(), 2 + 33);
    }

    #[test]
    fn test_bytes_inline_and_explicit() {
        assert_eq!(encode(&Value::bytes(vec![0xAA])).unwrap(), [0x71, 0xAA]);

        let b = vec![0u8; 300];
        let encoded = encode(&Value::bytes(b)).unwrap();
        assert_eq!(encoded[0], 0x92);
        assert_eq!(&encoded[1..3], &300u16.to_le_bytes());
    }

    #[test]
    fn test_small_dict() {
        let dict = Value::Dict(vec![(Value::string("a"), Value::Int(1))]);
        assert_eq!(encode(&dict).unwrap(), [0xE1, 0x41, b'a', 0x09]);
    }

    #[test]
    fn test_large_array_is_terminated() {
        let items: Vec<Value> = (0..20).map(|_| Value::Null).collect();
        let encoded = encode(&Value::Array(items)).unwrap();
        assert_eq!(encoded[0], 0xDF);
        assert_eq!(*encoded.last().unwrap(), 0x03);
        assert_eq!(encoded.len(), 1 + 20 + 1);
    }

    #[test]
    fn test_repeated_string_becomes_pointer() {
        let dict = Value::Dict(vec![
            (Value::string("name"), Value::string("name")),
        ]);
        let encoded = encode(&dict).unwrap();
        // dict header, "name" literal, then a pointer to table slot 0
        assert_eq!(
            encoded,
            [0xE1, 0x44, b'n', b'a', b'm', b'e', 0xA0]
        );
    }

    #[test]
    fn test_empty_string_never_pointed() {
        let arr = Value::Array(vec![Value::string(""), Value::string("")]);
        assert_eq!(encode(&arr).unwrap(), [0xD2, 0x40, 0x40]);
    }
}
