//! Pair-Setup: first-time PIN pairing
//!
//! Six messages keyed by a 1-byte sequence number the device echoes back.
//! The SRP identity string is fixed to `Pair-Setup`; the PIN shown on the
//! device screen is the password. A completed exchange yields the long-term
//! credential record for all later reconnects.

use super::storage::Credentials;
use super::tlv::{TlvEncoder, TlvItems, TlvTag, methods};
use super::PairingError;
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, HkdfSha512, Nonce, SrpClient, SrpVerifier,
};

const SRP_IDENTITY: &[u8] = b"Pair-Setup";

/// Pair-Setup session
pub struct PairSetup {
    client_id: String,
    /// Our freshly generated Ed25519 long-term key pair
    signing_keypair: Ed25519KeyPair,
    /// PIN entered by the user, required before M2 can be processed
    pin: Option<String>,
    srp: Option<SrpClient>,
    verifier: Option<SrpVerifier>,
    /// SRP session key K, available after M4
    session_key: Option<Vec<u8>>,
}

impl PairSetup {
    /// Create a session that will pair under the given client identifier
    ///
    /// # Errors
    /// Returns an error if SRP group setup fails.
    pub fn new(client_id: impl Into<String>) -> Result<Self, PairingError> {
        Ok(Self {
            client_id: client_id.into(),
            signing_keypair: Ed25519KeyPair::generate(),
            pin: None,
            srp: Some(SrpClient::new()?),
            verifier: None,
            session_key: None,
        })
    }

    /// Provide the PIN displayed on the device
    pub fn set_pin(&mut self, pin: &str) {
        self.pin = Some(pin.to_string());
    }

    /// Build M1
    #[must_use]
    pub fn start(&self) -> Vec<u8> {
        TlvEncoder::new()
            .add_seq(1)
            .add_method(methods::PAIR_SETUP)
            .build()
    }

    /// Process M2 (salt + server public value) and build M3
    ///
    /// # Errors
    /// Fails if the PIN is unset, the device reported an error, or the
    /// response is missing fields.
    pub fn process_m2(&mut self, data: &[u8]) -> Result<Vec<u8>, PairingError> {
        let items = TlvItems::decode(data)?;
        PairingError::check_step(&items, 2)?;

        let salt = items
            .find(TlvTag::Salt)
            .ok_or(PairingError::MissingField("salt"))?;
        let server_public = items
            .find(TlvTag::PublicKey)
            .ok_or(PairingError::MissingField("publicKey"))?;

        let pin = self.pin.as_ref().ok_or(PairingError::PinNotSet)?;
        let srp = self
            .srp
            .take()
            .ok_or(PairingError::InvalidServerResponse("M2 already processed"))?;

        let client_public = srp.public_key();
        let verifier =
            srp.process_challenge(SRP_IDENTITY, pin.as_bytes(), salt, server_public)?;

        let m3 = TlvEncoder::new()
            .add_seq(3)
            .add(TlvTag::PublicKey, &client_public)
            .add(TlvTag::Proof, verifier.client_proof())
            .build();

        self.verifier = Some(verifier);
        Ok(m3)
    }

    /// Process M4 (server proof) and build M5 (signed, encrypted identity)
    ///
    /// # Errors
    /// Fails closed on proof mismatch; a wrong PIN is not retryable within
    /// this session.
    pub fn process_m4(&mut self, data: &[u8]) -> Result<Vec<u8>, PairingError> {
        let items = TlvItems::decode(data)?;
        PairingError::check_step(&items, 4)?;

        let server_proof = items
            .find(TlvTag::Proof)
            .ok_or(PairingError::MissingField("proof"))?;

        let verifier = self
            .verifier
            .as_ref()
            .ok_or(PairingError::InvalidServerResponse("M4 before M2"))?;

        let session_key = verifier
            .verify_server(server_proof)
            .map_err(|_| PairingError::ProofVerificationFailed)?;
        let session_key = session_key.as_bytes().to_vec();

        let hkdf = HkdfSha512::new(Some(b"Pair-Setup-Controller-Sign-Salt"), &session_key);
        let device_x = hkdf.expand_fixed::<32>(b"Pair-Setup-Controller-Sign-Info")?;

        // Sign: derived-key || identifier || long-term public key
        let mut sign_data = Vec::with_capacity(32 + self.client_id.len() + 32);
        sign_data.extend_from_slice(&device_x);
        sign_data.extend_from_slice(self.client_id.as_bytes());
        sign_data.extend_from_slice(self.signing_keypair.public_key().as_bytes());
        let signature = self.signing_keypair.sign(&sign_data);

        let identity_tlv = TlvEncoder::new()
            .add(TlvTag::Identifier, self.client_id.as_bytes())
            .add(
                TlvTag::PublicKey,
                self.signing_keypair.public_key().as_bytes(),
            )
            .add(TlvTag::Signature, &signature.to_bytes())
            .build();

        let cipher = ChaCha20Poly1305Cipher::new(&self.encrypt_key(&session_key)?)?;
        let encrypted = cipher.encrypt(&Nonce::from_label(b"PS-Msg05"), &identity_tlv)?;

        let m5 = TlvEncoder::new()
            .add_seq(5)
            .add(TlvTag::EncryptedData, &encrypted)
            .build();

        self.session_key = Some(session_key);
        Ok(m5)
    }

    /// Process M6 (device identity) and produce the credential record
    ///
    /// # Errors
    /// Fails if decryption fails or the device identity is incomplete.
    pub fn process_m6(&mut self, data: &[u8]) -> Result<Credentials, PairingError> {
        let items = TlvItems::decode(data)?;
        PairingError::check_step(&items, 6)?;

        let encrypted = items
            .find(TlvTag::EncryptedData)
            .ok_or(PairingError::MissingField("encryptedData"))?;

        let session_key = self
            .session_key
            .as_ref()
            .ok_or(PairingError::InvalidServerResponse("M6 before M4"))?;

        let cipher = ChaCha20Poly1305Cipher::new(&self.encrypt_key(session_key)?)?;
        let decrypted = cipher.decrypt(&Nonce::from_label(b"PS-Msg06"), encrypted)?;

        let identity = TlvItems::decode(&decrypted)?;
        let server_id = identity
            .find(TlvTag::Identifier)
            .ok_or(PairingError::MissingField("identifier"))?;
        let server_ltpk = identity
            .find(TlvTag::PublicKey)
            .ok_or(PairingError::MissingField("publicKey"))?;

        let server_ltpk: [u8; 32] = server_ltpk
            .try_into()
            .map_err(|_| PairingError::InvalidServerResponse("bad public key length"))?;
        let server_id = String::from_utf8(server_id.to_vec())
            .map_err(|_| PairingError::InvalidServerResponse("non-UTF8 identifier"))?;

        Ok(Credentials {
            ltsk: self.signing_keypair.secret_bytes(),
            ltpk: *self.signing_keypair.public_key().as_bytes(),
            client_id: self.client_id.clone(),
            server_ltpk,
            server_id,
        })
    }

    fn encrypt_key(&self, session_key: &[u8]) -> Result<[u8; 32], PairingError> {
        let hkdf = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), session_key);
        Ok(hkdf.expand_fixed::<32>(b"Pair-Setup-Encrypt-Info")?)
    }
}
