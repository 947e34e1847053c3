//! TLV8 encoding used inside the pairing handshakes

use thiserror::Error;

/// TLV tags used by the pairing protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvTag {
    /// Pairing method
    Method = 0x00,
    /// Pairing identifier
    Identifier = 0x01,
    /// Salt for SRP
    Salt = 0x02,
    /// Public key
    PublicKey = 0x03,
    /// Proof (M1/M2 in SRP)
    Proof = 0x04,
    /// Encrypted data
    EncryptedData = 0x05,
    /// Step sequence number
    SeqNo = 0x06,
    /// Error code
    Error = 0x07,
    /// Back-off delay
    BackOff = 0x08,
    /// Certificate
    Certificate = 0x09,
    /// Signature
    Signature = 0x0A,
    /// Permissions
    Permissions = 0x0B,
    /// Fragment data
    FragmentData = 0x0C,
    /// Fragment last
    FragmentLast = 0x0D,
    /// Device name
    Name = 0x11,
    /// Flags
    Flags = 0x13,
}

impl TlvTag {
    /// Create from byte value
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::SeqNo),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::BackOff),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x11 => Some(Self::Name),
            0x13 => Some(Self::Flags),
            _ => None,
        }
    }
}

/// TLV decoding errors
#[derive(Debug, Error)]
pub enum TlvError {
    #[error("unexpected end of TLV data")]
    UnexpectedEnd,

    #[error("missing field: {0:?}")]
    MissingField(TlvTag),

    #[error("invalid value for {0:?}")]
    InvalidValue(TlvTag),
}

/// TLV encoder
///
/// Values over 255 bytes fragment into consecutive same-tag records, the
/// last possibly shorter. Zero-length values still write one record.
pub struct TlvEncoder {
    buffer: Vec<u8>,
}

impl TlvEncoder {
    /// Create a new encoder
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Add a TLV item
    #[must_use]
    pub fn add(mut self, tag: TlvTag, value: &[u8]) -> Self {
        for chunk in value.chunks(255) {
            self.buffer.push(tag as u8);
            #[allow(clippy::cast_possible_truncation)]
            self.buffer.push(chunk.len() as u8);
            self.buffer.extend_from_slice(chunk);
        }

        if value.is_empty() {
            self.buffer.push(tag as u8);
            self.buffer.push(0);
        }

        self
    }

    /// Add a single byte value
    #[must_use]
    pub fn add_byte(self, tag: TlvTag, value: u8) -> Self {
        self.add(tag, &[value])
    }

    /// Add the step sequence number
    #[must_use]
    pub fn add_seq(self, seq: u8) -> Self {
        self.add_byte(TlvTag::SeqNo, seq)
    }

    /// Add the pairing method
    #[must_use]
    pub fn add_method(self, method: u8) -> Self {
        self.add_byte(TlvTag::Method, method)
    }

    /// Build the encoded TLV data
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for TlvEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded TLV item list, logical items in wire order
pub struct TlvItems {
    items: Vec<(TlvTag, Vec<u8>)>,
}

impl TlvItems {
    /// Decode TLV data
    ///
    /// Consecutive records with the same tag merge into one logical item;
    /// non-adjacent runs stay separate. Records with unknown tag bytes are
    /// skipped.
    ///
    /// # Errors
    /// Returns `TlvError::UnexpectedEnd` if a record is truncated.
    pub fn decode(data: &[u8]) -> Result<Self, TlvError> {
        let mut items: Vec<(TlvTag, Vec<u8>)> = Vec::new();
        let mut last_raw_tag: Option<u8> = None;
        let mut pos = 0;

        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(TlvError::UnexpectedEnd);
            }
            let raw_tag = data[pos];
            let length = usize::from(data[pos + 1]);
            pos += 2;

            if pos + length > data.len() {
                return Err(TlvError::UnexpectedEnd);
            }
            let value = &data[pos..pos + length];
            pos += length;

            if let Some(tag) = TlvTag::from_byte(raw_tag) {
                if last_raw_tag == Some(raw_tag) {
                    if let Some(last) = items.last_mut() {
                        last.1.extend_from_slice(value);
                    }
                } else {
                    items.push((tag, value.to_vec()));
                }
            }
            last_raw_tag = Some(raw_tag);
        }

        Ok(Self { items })
    }

    /// All logical items in wire order
    #[must_use]
    pub fn items(&self) -> &[(TlvTag, Vec<u8>)] {
        &self.items
    }

    /// First item with the given tag
    #[must_use]
    pub fn find(&self, tag: TlvTag) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_slice())
    }

    /// First item with the given tag, or a missing-field error
    ///
    /// # Errors
    /// Returns `TlvError::MissingField` if no item carries the tag.
    pub fn require(&self, tag: TlvTag) -> Result<&[u8], TlvError> {
        self.find(tag).ok_or(TlvError::MissingField(tag))
    }

    /// The step sequence number
    ///
    /// # Errors
    /// Returns an error if the field is absent or not one byte.
    pub fn seq(&self) -> Result<u8, TlvError> {
        let value = self.require(TlvTag::SeqNo)?;
        if value.len() != 1 {
            return Err(TlvError::InvalidValue(TlvTag::SeqNo));
        }
        Ok(value[0])
    }

    /// Device-reported error code, if present
    #[must_use]
    pub fn error_code(&self) -> Option<u8> {
        self.find(TlvTag::Error).and_then(|v| v.first().copied())
    }
}

/// Pairing method constants
pub mod methods {
    /// Pair-Setup
    pub const PAIR_SETUP: u8 = 0;
    /// Pair-Verify
    pub const PAIR_VERIFY: u8 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_seq_and_method() {
        let encoded = TlvEncoder::new().add_seq(1).add_method(0).build();
        assert_eq!(encoded, [0x06, 0x01, 0x01, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_empty_value_writes_one_record() {
        let encoded = TlvEncoder::new().add(TlvTag::Identifier, &[]).build();
        assert_eq!(encoded, [0x01, 0x00]);
    }

    #[test]
    fn test_fragmentation_over_255() {
        let value = vec![0x5A; 300];
        let encoded = TlvEncoder::new().add(TlvTag::PublicKey, &value).build();

        // Two physical records: 255 + 45
        assert_eq!(encoded.len(), 2 + 255 + 2 + 45);
        assert_eq!(encoded[0], 0x03);
        assert_eq!(encoded[1], 255);
        assert_eq!(encoded[2 + 255], 0x03);
        assert_eq!(encoded[2 + 255 + 1], 45);

        let decoded = TlvItems::decode(&encoded).unwrap();
        assert_eq!(decoded.find(TlvTag::PublicKey), Some(value.as_slice()));
    }

    #[test]
    fn test_roundtrip_multiple_items() {
        let proof = vec![0xAB; 64];
        let key = vec![0xCD; 384];
        let encoded = TlvEncoder::new()
            .add_seq(3)
            .add(TlvTag::PublicKey, &key)
            .add(TlvTag::Proof, &proof)
            .build();

        let decoded = TlvItems::decode(&encoded).unwrap();
        assert_eq!(decoded.seq().unwrap(), 3);
        assert_eq!(decoded.find(TlvTag::PublicKey), Some(key.as_slice()));
        assert_eq!(decoded.find(TlvTag::Proof), Some(proof.as_slice()));
        assert_eq!(decoded.items().len(), 3);
    }

    #[test]
    fn test_non_adjacent_same_tag_not_merged() {
        let data = [
            0x01, 0x01, b'a', // identifier "a"
            0x06, 0x01, 0x02, // seq 2
            0x01, 0x01, b'b', // identifier "b"
        ];
        let decoded = TlvItems::decode(&data).unwrap();
        assert_eq!(decoded.items().len(), 3);
        assert_eq!(decoded.find(TlvTag::Identifier), Some(&b"a"[..]));
    }

    #[test]
    fn test_unknown_tags_skipped() {
        let data = [
            0xF0, 0x02, 0xAA, 0xBB, // unknown tag
            0x06, 0x01, 0x01, // seq 1
        ];
        let decoded = TlvItems::decode(&data).unwrap();
        assert_eq!(decoded.items().len(), 1);
        assert_eq!(decoded.seq().unwrap(), 1);
    }

    #[test]
    fn test_unknown_tag_breaks_merge_run() {
        // Two same-tag records separated by an unknown record stay separate.
        let data = [
            0x01, 0x01, b'a',
            0xF0, 0x00,
            0x01, 0x01, b'b',
        ];
        let decoded = TlvItems::decode(&data).unwrap();
        assert_eq!(decoded.items().len(), 2);
    }

    #[test]
    fn test_truncated_record() {
        assert!(matches!(
            TlvItems::decode(&[0x06]),
            Err(TlvError::UnexpectedEnd)
        ));
        assert!(matches!(
            TlvItems::decode(&[0x06, 0x02, 0x01]),
            Err(TlvError::UnexpectedEnd)
        ));
    }

    #[test]
    fn test_error_code_accessor() {
        let encoded = TlvEncoder::new()
            .add_seq(4)
            .add_byte(TlvTag::Error, 0x02)
            .build();
        let decoded = TlvItems::decode(&encoded).unwrap();
        assert_eq!(decoded.error_code(), Some(0x02));
    }
}
