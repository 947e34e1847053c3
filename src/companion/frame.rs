//! Companion link framing: 1-byte type plus 3-byte big-endian length

use thiserror::Error;

/// Frame types observed on the Companion link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Keep-alive, no payload semantics
    NoOp,
    /// Pair-Setup first message
    PsStart,
    /// Pair-Setup continuation
    PsNext,
    /// Pair-Verify first message
    PvStart,
    /// Pair-Verify continuation
    PvNext,
    /// Unencrypted value-codec payload
    UOpack,
    /// Encrypted value-codec payload (once encryption is on)
    EOpack,
    /// Value-codec payload, plain variant
    POpack,
    /// Pairing association request
    PaReq,
    /// Pairing association response
    PaRsp,
    /// Session start request
    SessionStartRequest,
    /// Session start response
    SessionStartResponse,
    /// Session payload
    SessionData,
    /// Family identity request
    FamilyIdentityRequest,
    /// Family identity response
    FamilyIdentityResponse,
    /// Family identity update
    FamilyIdentityUpdate,
    /// Unrecognized type byte, payload preserved for forward compatibility
    Unknown(u8),
}

impl FrameType {
    /// Wire byte for this frame type
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::NoOp => 1,
            Self::PsStart => 3,
            Self::PsNext => 4,
            Self::PvStart => 5,
            Self::PvNext => 6,
            Self::UOpack => 7,
            Self::EOpack => 8,
            Self::POpack => 9,
            Self::PaReq => 10,
            Self::PaRsp => 11,
            Self::SessionStartRequest => 16,
            Self::SessionStartResponse => 17,
            Self::SessionData => 18,
            Self::FamilyIdentityRequest => 32,
            Self::FamilyIdentityResponse => 33,
            Self::FamilyIdentityUpdate => 34,
            Self::Unknown(b) => b,
        }
    }

    /// Parse a wire byte
    #[must_use]
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::NoOp,
            3 => Self::PsStart,
            4 => Self::PsNext,
            5 => Self::PvStart,
            6 => Self::PvNext,
            7 => Self::UOpack,
            8 => Self::EOpack,
            9 => Self::POpack,
            10 => Self::PaReq,
            11 => Self::PaRsp,
            16 => Self::SessionStartRequest,
            17 => Self::SessionStartResponse,
            18 => Self::SessionData,
            32 => Self::FamilyIdentityRequest,
            33 => Self::FamilyIdentityResponse,
            34 => Self::FamilyIdentityUpdate,
            other => Self::Unknown(other),
        }
    }

    /// Whether payloads of this type are encrypted once transport
    /// encryption is enabled
    #[must_use]
    pub fn is_encrypted_type(self) -> bool {
        matches!(self, Self::EOpack | Self::PvNext | Self::PsNext)
    }

    /// Whether this frame carries a value-codec envelope
    #[must_use]
    pub fn is_opack_type(self) -> bool {
        matches!(self, Self::UOpack | Self::EOpack | Self::POpack)
    }

    /// Whether this frame belongs to a pairing exchange
    #[must_use]
    pub fn is_auth_type(self) -> bool {
        matches!(
            self,
            Self::PsStart | Self::PsNext | Self::PvStart | Self::PvNext
        )
    }
}

/// Frame codec errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// One Companion link frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Payload bytes (possibly encrypted)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame
    #[must_use]
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// The 4 header bytes for a frame of this type and payload length
    ///
    /// Also used as AEAD associated data, where the length reflects the
    /// encrypted payload.
    #[must_use]
    pub fn header_bytes(frame_type: FrameType, payload_len: usize) -> [u8; 4] {
        let len = (payload_len as u32).to_be_bytes();
        [frame_type.to_byte(), len[1], len[2], len[3]]
    }

    /// Header of this frame as it appears on the wire
    #[must_use]
    pub fn header(&self) -> [u8; 4] {
        Self::header_bytes(self.frame_type, self.payload.len())
    }

    /// Serialize to wire bytes
    ///
    /// # Errors
    /// Returns an error if the payload does not fit the 24-bit length field.
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > 0xFF_FFFF {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }
        let mut output = Vec::with_capacity(4 + self.payload.len());
        output.extend_from_slice(&self.header());
        output.extend_from_slice(&self.payload);
        Ok(output)
    }

    /// Parse one frame from the front of `buffer`
    ///
    /// Returns `None` while fewer than `4 + declared length` bytes are
    /// available; the caller re-invokes once more bytes arrive. Unknown type
    /// bytes parse successfully with their payload preserved.
    #[must_use]
    pub fn parse(buffer: &[u8]) -> Option<(Frame, usize)> {
        if buffer.len() < 4 {
            return None;
        }
        let frame_type = FrameType::from_byte(buffer[0]);
        let length = usize::from(buffer[1]) << 16 | usize::from(buffer[2]) << 8
            | usize::from(buffer[3]);
        if buffer.len() < 4 + length {
            return None;
        }
        Some((
            Frame::new(frame_type, buffer[4..4 + length].to_vec()),
            4 + length,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_sizes() {
        for frame_type in [
            FrameType::NoOp,
            FrameType::EOpack,
            FrameType::PsStart,
            FrameType::SessionData,
        ] {
            for size in [0usize, 2, 100, 300] {
                let frame = Frame::new(frame_type, vec![0x55; size]);
                let wire = frame.serialize().unwrap();
                let (parsed, consumed) = Frame::parse(&wire).unwrap();
                assert_eq!(parsed, frame);
                assert_eq!(consumed, wire.len());
            }
        }
    }

    #[test]
    fn test_header_length_is_big_endian() {
        let frame = Frame::new(FrameType::EOpack, vec![0; 0x010203]);
        assert_eq!(frame.header(), [8, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_partial_input_returns_none() {
        let frame = Frame::new(FrameType::EOpack, vec![1, 2, 3, 4, 5]);
        let wire = frame.serialize().unwrap();

        for cut in 0..wire.len() {
            assert!(Frame::parse(&wire[..cut]).is_none());
        }
    }

    #[test]
    fn test_unknown_type_preserved() {
        let wire = [0xEE, 0, 0, 2, 0xAA, 0xBB];
        let (frame, consumed) = Frame::parse(&wire).unwrap();
        assert_eq!(frame.frame_type, FrameType::Unknown(0xEE));
        assert_eq!(frame.payload, [0xAA, 0xBB]);
        assert_eq!(consumed, 6);
        assert_eq!(frame.serialize().unwrap(), wire);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut wire = Frame::new(FrameType::NoOp, vec![]).serialize().unwrap();
        wire.extend_from_slice(&[9, 9, 9]);
        let (_, consumed) = Frame::parse(&wire).unwrap();
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let frame = Frame::new(FrameType::EOpack, vec![0; 0x100_0000]);
        assert!(matches!(
            frame.serialize(),
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_encrypted_type_set() {
        assert!(FrameType::EOpack.is_encrypted_type());
        assert!(FrameType::PsNext.is_encrypted_type());
        assert!(FrameType::PvNext.is_encrypted_type());
        assert!(!FrameType::PsStart.is_encrypted_type());
        assert!(!FrameType::UOpack.is_encrypted_type());
    }
}
