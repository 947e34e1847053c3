use super::CryptoError;
use hkdf::Hkdf;
use sha2::Sha512;

/// HKDF-SHA512 for key derivation
pub struct HkdfSha512 {
    hkdf: Hkdf<Sha512>,
}

impl HkdfSha512 {
    /// Create HKDF instance from input key material
    ///
    /// # Arguments
    /// * `salt` - Optional salt (can be None or empty)
    /// * `ikm` - Input key material
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha512>::new(salt, ikm);
        Self { hkdf }
    }

    /// Expand to derive output key material
    pub fn expand(&self, info: &[u8], length: usize) -> Result<Vec<u8>, CryptoError> {
        let mut okm = vec![0u8; length];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed("HKDF expand failed".into()))?;
        Ok(okm)
    }

    /// Expand into fixed-size array
    pub fn expand_fixed<const N: usize>(&self, info: &[u8]) -> Result<[u8; N], CryptoError> {
        let mut okm = [0u8; N];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed("HKDF expand failed".into()))?;
        Ok(okm)
    }
}

/// Convenience function for one-shot key derivation
pub fn derive_key(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    HkdfSha512::new(salt, ikm).expand(info, length)
}

/// Directional key pair for one encrypted channel
///
/// Every channel derives its output (our writes) and input (device writes)
/// keys from the verify shared secret with channel-specific labels.
pub struct ChannelKeys {
    /// Key for encrypting data we send
    pub output_key: [u8; 32],
    /// Key for decrypting data the device sends
    pub input_key: [u8; 32],
}

impl ChannelKeys {
    /// Derive a key pair with the given salt and per-direction info strings
    pub fn derive(
        shared_secret: &[u8],
        salt: &[u8],
        output_info: &[u8],
        input_info: &[u8],
    ) -> Result<Self, CryptoError> {
        let hkdf = HkdfSha512::new(Some(salt), shared_secret);

        Ok(Self {
            output_key: hkdf.expand_fixed::<32>(output_info)?,
            input_key: hkdf.expand_fixed::<32>(input_info)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_is_deterministic() {
        let a = derive_key(Some(b"Control-Salt"), b"shared", b"Control-Write-Encryption-Key", 32)
            .unwrap();
        let b = derive_key(Some(b"Control-Salt"), b"shared", b"Control-Write-Encryption-Key", 32)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_info_separates_keys() {
        let keys = ChannelKeys::derive(
            b"shared",
            b"Control-Salt",
            b"Control-Write-Encryption-Key",
            b"Control-Read-Encryption-Key",
        )
        .unwrap();
        assert_ne!(keys.output_key, keys.input_key);
    }

    #[test]
    fn test_empty_salt_supported() {
        let key = derive_key(Some(b""), b"shared", b"ClientEncrypt-main", 32).unwrap();
        assert_eq!(key.len(), 32);
    }
}
