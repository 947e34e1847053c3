//! HAP session encryption: fixed-block AEAD framing
//!
//! Every tunnel channel wraps its byte stream in blocks of at most 1024
//! plaintext bytes. Each block is sealed separately: nonce = 4 zero bytes
//! plus the little-endian block counter, associated data = the 2-byte
//! little-endian plaintext length, wire form = length ++ ciphertext ++ tag.
//! One direction is one counter; the structs are per-direction on purpose
//! and cannot be cloned.

use byteorder::{ByteOrder, LittleEndian};

use crate::protocol::crypto::{ChaCha20Poly1305Cipher, CryptoError, Nonce, lengths};

/// Maximum plaintext bytes per block
pub const BLOCK_SIZE: usize = 1024;

/// Per-block wire overhead: 2-byte length prefix plus 16-byte tag
pub const BLOCK_OVERHEAD: usize = 2 + lengths::CHACHA_TAG;

/// Encrypting direction of a HAP session
pub struct HapEncryptor {
    cipher: ChaCha20Poly1305Cipher,
    counter: u64,
}

impl HapEncryptor {
    /// Create from this direction's key
    ///
    /// # Errors
    /// Returns an error if the key length is wrong.
    pub fn new(key: &[u8; 32]) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: ChaCha20Poly1305Cipher::new(key)?,
            counter: 0,
        })
    }

    /// Encrypt a payload into consecutive wire blocks
    ///
    /// Empty input produces empty output.
    ///
    /// # Errors
    /// Returns an error if sealing a block fails.
    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut output =
            Vec::with_capacity(data.len() + data.len().div_ceil(BLOCK_SIZE) * BLOCK_OVERHEAD);

        for chunk in data.chunks(BLOCK_SIZE) {
            let mut len_bytes = [0u8; 2];
            #[allow(clippy::cast_possible_truncation)]
            LittleEndian::write_u16(&mut len_bytes, chunk.len() as u16);
            let nonce = Nonce::from_block_counter(self.counter);
            self.counter += 1;

            let sealed = self.cipher.encrypt_with_aad(&nonce, &len_bytes, chunk)?;
            output.extend_from_slice(&len_bytes);
            output.extend_from_slice(&sealed);
        }

        Ok(output)
    }
}

/// Decrypting direction of a HAP session
///
/// Stream-oriented: feed arbitrary receive buffers, get back whatever
/// complete blocks decrypt; trailing partial bytes are retained for the
/// next feed. Any authentication failure is fatal for the channel.
pub struct HapDecryptor {
    cipher: ChaCha20Poly1305Cipher,
    counter: u64,
    pending: Vec<u8>,
}

impl HapDecryptor {
    /// Create from this direction's key
    ///
    /// # Errors
    /// Returns an error if the key length is wrong.
    pub fn new(key: &[u8; 32]) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: ChaCha20Poly1305Cipher::new(key)?,
            counter: 0,
            pending: Vec::new(),
        })
    }

    /// Feed received bytes, returning all plaintext that became available
    ///
    /// # Errors
    /// Returns `DecryptionFailed` if any block fails authentication; the
    /// stream is desynchronized and the channel must be torn down.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.pending.extend_from_slice(data);
        let mut output = Vec::new();

        loop {
            if self.pending.len() < 2 {
                break;
            }
            let block_len = usize::from(LittleEndian::read_u16(&self.pending[..2]));
            let wire_len = 2 + block_len + lengths::CHACHA_TAG;
            if self.pending.len() < wire_len {
                break;
            }

            let nonce = Nonce::from_block_counter(self.counter);
            let plaintext = self.cipher.decrypt_with_aad(
                &nonce,
                &self.pending[..2],
                &self.pending[2..wire_len],
            )?;
            self.counter += 1;

            output.extend_from_slice(&plaintext);
            self.pending.drain(..wire_len);
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (HapEncryptor, HapDecryptor) {
        let key = [0x24u8; 32];
        (
            HapEncryptor::new(&key).unwrap(),
            HapDecryptor::new(&key).unwrap(),
        )
    }

    #[test]
    fn test_wire_sizes() {
        let (mut enc, _) = pair();
        assert_eq!(enc.encrypt(&[]).unwrap().len(), 0);
        assert_eq!(enc.encrypt(&[0u8; 1024]).unwrap().len(), 1042);
        assert_eq!(enc.encrypt(&[0u8; 2048]).unwrap().len(), 2084);
        // A short block still carries full overhead
        assert_eq!(enc.encrypt(&[0u8; 10]).unwrap().len(), 10 + BLOCK_OVERHEAD);
    }

    #[test]
    fn test_roundtrip_multi_block() {
        let (mut enc, mut dec) = pair();
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

        let wire = enc.encrypt(&data).unwrap();
        assert_eq!(dec.feed(&wire).unwrap(), data);
    }

    #[test]
    fn test_streamed_feed_retains_partial() {
        let (mut enc, mut dec) = pair();
        let data = vec![0xABu8; 1500];
        let wire = enc.encrypt(&data).unwrap();

        // Dribble bytes in odd-sized pieces
        let mut collected = Vec::new();
        for piece in wire.chunks(7) {
            collected.extend_from_slice(&dec.feed(piece).unwrap());
        }
        assert_eq!(collected, data);
    }

    #[test]
    fn test_counters_advance_per_block() {
        let (mut enc, mut dec) = pair();
        // Two separate encrypt calls, blocks decrypt in sequence
        let a = enc.encrypt(b"first").unwrap();
        let b = enc.encrypt(b"second").unwrap();

        assert_eq!(dec.feed(&a).unwrap(), b"first");
        assert_eq!(dec.feed(&b).unwrap(), b"second");
    }

    #[test]
    fn test_tampered_block_is_fatal() {
        let (mut enc, mut dec) = pair();
        let mut wire = enc.encrypt(b"payload").unwrap();
        wire[4] ^= 0x80;

        assert!(matches!(
            dec.feed(&wire),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_directions_are_independent() {
        let out_key = [1u8; 32];
        let in_key = [2u8; 32];
        let mut enc = HapEncryptor::new(&out_key).unwrap();
        let mut dec = HapDecryptor::new(&in_key).unwrap();

        let wire = enc.encrypt(b"mismatched").unwrap();
        assert!(dec.feed(&wire).is_err());
    }
}
