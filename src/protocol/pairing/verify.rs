//! Pair-Verify: ephemeral mutual authentication with stored credentials
//!
//! Four messages over an X25519 exchange. Each successful run derives fresh
//! transport keys; nothing from a previous session is reused.

use super::storage::Credentials;
use super::tlv::{TlvEncoder, TlvItems, TlvTag};
use super::PairingError;
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature, HkdfSha512, Nonce,
    X25519KeyPair, X25519PublicKey,
};

/// Transport keys for the Companion link, one per direction
pub struct TransportKeys {
    /// Key for frames we send
    pub encrypt_key: [u8; 32],
    /// Key for frames the device sends
    pub decrypt_key: [u8; 32],
}

/// Pair-Verify session
pub struct PairVerify {
    credentials: Credentials,
    ephemeral: X25519KeyPair,
    server_ephemeral: Option<X25519PublicKey>,
    shared_secret: Option<[u8; 32]>,
}

impl PairVerify {
    /// Create a session from stored credentials
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ephemeral: X25519KeyPair::generate(),
            server_ephemeral: None,
            shared_secret: None,
        }
    }

    /// Our ephemeral public key for this session
    #[must_use]
    pub fn ephemeral_public_key(&self) -> &[u8; 32] {
        self.ephemeral.public_key_bytes()
    }

    /// Build M1
    #[must_use]
    pub fn start(&self) -> Vec<u8> {
        TlvEncoder::new()
            .add_seq(1)
            .add(TlvTag::PublicKey, self.ephemeral.public_key().as_bytes())
            .build()
    }

    /// Process M2 (server ephemeral + encrypted identity proof), build M3
    ///
    /// # Errors
    /// Distinguishes `IdentityMismatch` (the device is not the one we
    /// paired with) from `SignatureVerificationFailed` (it is, but its
    /// proof is bad); both are fatal to the attempt.
    pub fn process_m2(&mut self, data: &[u8]) -> Result<Vec<u8>, PairingError> {
        let items = TlvItems::decode(data)?;
        PairingError::check_step(&items, 2)?;

        let server_ephemeral_bytes = items
            .find(TlvTag::PublicKey)
            .ok_or(PairingError::MissingField("publicKey"))?;
        let encrypted = items
            .find(TlvTag::EncryptedData)
            .ok_or(PairingError::MissingField("encryptedData"))?;

        let server_ephemeral = X25519PublicKey::from_bytes(server_ephemeral_bytes)?;
        let shared = self.ephemeral.diffie_hellman(&server_ephemeral);

        let hkdf = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes());
        let session_key = hkdf.expand_fixed::<32>(b"Pair-Verify-Encrypt-Info")?;

        let cipher = ChaCha20Poly1305Cipher::new(&session_key)?;
        let decrypted = cipher.decrypt(&Nonce::from_label(b"PV-Msg02"), encrypted)?;

        let identity = TlvItems::decode(&decrypted)?;
        let server_id = identity
            .find(TlvTag::Identifier)
            .ok_or(PairingError::MissingField("identifier"))?;
        let server_signature = identity
            .find(TlvTag::Signature)
            .ok_or(PairingError::MissingField("signature"))?;

        if server_id != self.credentials.server_id.as_bytes() {
            return Err(PairingError::IdentityMismatch);
        }

        // Server signs: server-ephemeral || server-id || our-ephemeral
        let mut signed_data = Vec::new();
        signed_data.extend_from_slice(server_ephemeral_bytes);
        signed_data.extend_from_slice(server_id);
        signed_data.extend_from_slice(self.ephemeral.public_key().as_bytes());

        let server_ltpk = Ed25519PublicKey::from_bytes(&self.credentials.server_ltpk)?;
        let signature = Ed25519Signature::from_bytes(server_signature)?;
        server_ltpk
            .verify(&signed_data, &signature)
            .map_err(|_| PairingError::SignatureVerificationFailed)?;

        // We sign: our-ephemeral || our-id || server-ephemeral
        let mut sign_data = Vec::new();
        sign_data.extend_from_slice(self.ephemeral.public_key().as_bytes());
        sign_data.extend_from_slice(self.credentials.client_id.as_bytes());
        sign_data.extend_from_slice(server_ephemeral_bytes);

        let our_keypair = Ed25519KeyPair::from_bytes(&self.credentials.ltsk)?;
        let our_signature = our_keypair.sign(&sign_data);

        let reply_tlv = TlvEncoder::new()
            .add(TlvTag::Identifier, self.credentials.client_id.as_bytes())
            .add(TlvTag::Signature, &our_signature.to_bytes())
            .build();

        let encrypted = cipher.encrypt(&Nonce::from_label(b"PV-Msg03"), &reply_tlv)?;

        let m3 = TlvEncoder::new()
            .add_seq(3)
            .add(TlvTag::EncryptedData, &encrypted)
            .build();

        self.server_ephemeral = Some(server_ephemeral);
        self.shared_secret = Some(*shared.as_bytes());

        Ok(m3)
    }

    /// Process M4, which carries no payload beyond the step marker
    ///
    /// # Errors
    /// Propagates an in-band error TLV or a wrong sequence number.
    pub fn process_m4(&self, data: &[u8]) -> Result<(), PairingError> {
        let items = TlvItems::decode(data)?;
        PairingError::check_step(&items, 4)?;
        Ok(())
    }

    /// Raw shared secret, available once M2 has been processed
    ///
    /// Channel-specific key derivation (the AirPlay tunnel) starts from
    /// this value with its own salt and info labels.
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8; 32]> {
        self.shared_secret.as_ref()
    }

    /// Derive the Companion transport keys
    ///
    /// Returns `None` before M2 has been processed.
    ///
    /// # Errors
    /// Returns an error only if key derivation itself fails.
    pub fn transport_keys(&self) -> Result<Option<TransportKeys>, PairingError> {
        let Some(shared) = self.shared_secret.as_ref() else {
            return Ok(None);
        };

        let hkdf = HkdfSha512::new(Some(b""), shared);
        Ok(Some(TransportKeys {
            encrypt_key: hkdf.expand_fixed::<32>(b"ClientEncrypt-main")?,
            decrypt_key: hkdf.expand_fixed::<32>(b"ServerEncrypt-main")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credentials() -> (Credentials, Ed25519KeyPair) {
        let our_keypair = Ed25519KeyPair::generate();
        let server_keypair = Ed25519KeyPair::generate();
        let credentials = Credentials {
            ltsk: our_keypair.secret_bytes(),
            ltpk: *our_keypair.public_key().as_bytes(),
            client_id: "36B49B0F-8B1A-4148".to_string(),
            server_ltpk: *server_keypair.public_key().as_bytes(),
            server_id: "AA:BB:CC:DD:EE:FF".to_string(),
        };
        (credentials, server_keypair)
    }

    /// Build a valid M2 as the device would
    fn build_m2(
        server_keypair: &Ed25519KeyPair,
        server_id: &str,
        client_ephemeral: &[u8; 32],
    ) -> (Vec<u8>, X25519KeyPair) {
        let server_ephemeral = X25519KeyPair::generate();
        let client_pub = X25519PublicKey::from_bytes(client_ephemeral).unwrap();
        let shared = server_ephemeral.diffie_hellman(&client_pub);

        let hkdf = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes());
        let session_key = hkdf.expand_fixed::<32>(b"Pair-Verify-Encrypt-Info").unwrap();

        let mut signed_data = Vec::new();
        signed_data.extend_from_slice(server_ephemeral.public_key().as_bytes());
        signed_data.extend_from_slice(server_id.as_bytes());
        signed_data.extend_from_slice(client_ephemeral);
        let signature = server_keypair.sign(&signed_data);

        let identity_tlv = TlvEncoder::new()
            .add(TlvTag::Identifier, server_id.as_bytes())
            .add(TlvTag::Signature, &signature.to_bytes())
            .build();

        let cipher = ChaCha20Poly1305Cipher::new(&session_key).unwrap();
        let encrypted = cipher
            .encrypt(&Nonce::from_label(b"PV-Msg02"), &identity_tlv)
            .unwrap();

        let m2 = TlvEncoder::new()
            .add_seq(2)
            .add(TlvTag::PublicKey, server_ephemeral.public_key().as_bytes())
            .add(TlvTag::EncryptedData, &encrypted)
            .build();

        (m2, server_ephemeral)
    }

    #[test]
    fn test_fresh_sessions_use_fresh_ephemerals() {
        let (credentials, _) = test_credentials();
        let a = PairVerify::new(credentials.clone());
        let b = PairVerify::new(credentials);

        assert_ne!(a.ephemeral_public_key(), b.ephemeral_public_key());
    }

    #[test]
    fn test_no_transport_keys_before_m2() {
        let (credentials, _) = test_credentials();
        let verify = PairVerify::new(credentials);
        assert!(verify.transport_keys().unwrap().is_none());
    }

    #[test]
    fn test_full_exchange_derives_keys() {
        let (credentials, server_keypair) = test_credentials();
        let mut verify = PairVerify::new(credentials.clone());

        let m1 = verify.start();
        let items = TlvItems::decode(&m1).unwrap();
        assert_eq!(items.seq().unwrap(), 1);

        let (m2, _) = build_m2(
            &server_keypair,
            &credentials.server_id,
            verify.ephemeral_public_key(),
        );
        let m3 = verify.process_m2(&m2).unwrap();

        let items = TlvItems::decode(&m3).unwrap();
        assert_eq!(items.seq().unwrap(), 3);
        assert!(items.find(TlvTag::EncryptedData).is_some());

        let m4 = TlvEncoder::new().add_seq(4).build();
        verify.process_m4(&m4).unwrap();

        let keys = verify.transport_keys().unwrap().unwrap();
        assert_ne!(keys.encrypt_key, keys.decrypt_key);
    }

    #[test]
    fn test_identity_mismatch_detected() {
        let (credentials, server_keypair) = test_credentials();
        let mut verify = PairVerify::new(credentials);

        let _ = verify.start();
        // Device identifies with an unexpected identifier, validly signed.
        let (m2, _) = build_m2(
            &server_keypair,
            "11:22:33:44:55:66",
            verify.ephemeral_public_key(),
        );

        assert!(matches!(
            verify.process_m2(&m2),
            Err(PairingError::IdentityMismatch)
        ));
    }

    #[test]
    fn test_wrong_server_key_fails_signature() {
        let (credentials, _) = test_credentials();
        let mut verify = PairVerify::new(credentials.clone());

        let _ = verify.start();
        // Signed by a different long-term key than the stored one.
        let rogue = Ed25519KeyPair::generate();
        let (m2, _) = build_m2(&rogue, &credentials.server_id, verify.ephemeral_public_key());

        assert!(matches!(
            verify.process_m2(&m2),
            Err(PairingError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_m2_error_tlv_preserved() {
        let (credentials, _) = test_credentials();
        let mut verify = PairVerify::new(credentials);

        let m2 = TlvEncoder::new()
            .add_seq(2)
            .add_byte(TlvTag::Error, 0x02)
            .build();

        assert!(matches!(
            verify.process_m2(&m2),
            Err(PairingError::ServerError { code: 0x02 })
        ));
    }

    #[test]
    fn test_m2_missing_public_key() {
        let (credentials, _) = test_credentials();
        let mut verify = PairVerify::new(credentials);

        let m2 = TlvEncoder::new()
            .add_seq(2)
            .add(TlvTag::EncryptedData, &[0u8; 32])
            .build();

        assert!(matches!(
            verify.process_m2(&m2),
            Err(PairingError::MissingField("publicKey"))
        ));
    }
}
