//! Companion transport encryption
//!
//! One AEAD call per frame payload. The nonce is the per-direction message
//! counter, little-endian in a 12-byte nonce, and the associated data is the
//! 4-byte frame header computed with the post-encryption length (payload
//! plus tag). Counters advance on every call and are never reused; the two
//! directions are independent state, so the structs are deliberately not
//! cloneable or copyable.

use super::frame::{Frame, FrameType};
use crate::protocol::crypto::{ChaCha20Poly1305Cipher, CryptoError, Nonce, lengths};

/// Encrypting half of a Companion transport session
pub struct CompanionEncryptor {
    cipher: ChaCha20Poly1305Cipher,
    counter: u64,
}

impl CompanionEncryptor {
    /// Create from the send-direction key
    ///
    /// # Errors
    /// Returns an error if the key length is wrong.
    pub fn new(key: &[u8; 32]) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: ChaCha20Poly1305Cipher::new(key)?,
            counter: 0,
        })
    }

    /// Encrypt a frame payload
    ///
    /// # Errors
    /// Returns an error if encryption fails.
    pub fn encrypt(
        &mut self,
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let aad = Frame::header_bytes(frame_type, payload.len() + lengths::CHACHA_TAG);
        let nonce = Nonce::from_counter(self.counter);
        self.counter += 1;
        self.cipher.encrypt_with_aad(&nonce, &aad, payload)
    }
}

/// Decrypting half of a Companion transport session
pub struct CompanionDecryptor {
    cipher: ChaCha20Poly1305Cipher,
    counter: u64,
}

impl CompanionDecryptor {
    /// Create from the receive-direction key
    ///
    /// # Errors
    /// Returns an error if the key length is wrong.
    pub fn new(key: &[u8; 32]) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: ChaCha20Poly1305Cipher::new(key)?,
            counter: 0,
        })
    }

    /// Decrypt a received frame payload
    ///
    /// Authentication failure means the stream desynchronized; the channel
    /// must be torn down, not resynchronized.
    ///
    /// # Errors
    /// Returns `CryptoError::DecryptionFailed` on authentication failure.
    pub fn decrypt(
        &mut self,
        frame_type: FrameType,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let aad = Frame::header_bytes(frame_type, ciphertext.len());
        let nonce = Nonce::from_counter(self.counter);
        self.counter += 1;
        self.cipher.decrypt_with_aad(&nonce, &aad, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (CompanionEncryptor, CompanionDecryptor) {
        let key = [0x11u8; 32];
        (
            CompanionEncryptor::new(&key).unwrap(),
            CompanionDecryptor::new(&key).unwrap(),
        )
    }

    #[test]
    fn test_roundtrip_sequence() {
        let (mut enc, mut dec) = pair();

        for i in 0..5u8 {
            let payload = vec![i; 20];
            let wire = enc.encrypt(FrameType::EOpack, &payload).unwrap();
            assert_eq!(wire.len(), payload.len() + 16);
            assert_eq!(dec.decrypt(FrameType::EOpack, &wire).unwrap(), payload);
        }
    }

    #[test]
    fn test_same_plaintext_differs_as_counter_advances() {
        let (mut enc, _) = pair();
        let a = enc.encrypt(FrameType::EOpack, b"same").unwrap();
        let b = enc.encrypt(FrameType::EOpack, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_frame_type_is_authenticated() {
        let (mut enc, mut dec) = pair();
        let wire = enc.encrypt(FrameType::EOpack, b"payload").unwrap();

        // Decrypting under a different frame type changes the AAD.
        assert!(dec.decrypt(FrameType::PvNext, &wire).is_err());
    }

    #[test]
    fn test_counter_skew_fails() {
        let (mut enc, mut dec) = pair();
        let first = enc.encrypt(FrameType::EOpack, b"one").unwrap();
        let second = enc.encrypt(FrameType::EOpack, b"two").unwrap();

        // Receiving out of order desynchronizes the stream.
        assert!(dec.decrypt(FrameType::EOpack, &second).is_err());
        // And the stream cannot recover afterwards.
        assert!(dec.decrypt(FrameType::EOpack, &first).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (mut enc, mut dec) = pair();
        let mut wire = enc.encrypt(FrameType::EOpack, b"payload").unwrap();
        wire[0] ^= 0x01;
        assert!(matches!(
            dec.decrypt(FrameType::EOpack, &wire),
            Err(CryptoError::DecryptionFailed)
        ));
    }
}
