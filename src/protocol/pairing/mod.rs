//! Pairing state machines
//!
//! Two independent exchanges share the TLV container: Pair-Setup runs a
//! PIN-authenticated key exchange the first time a device is paired and
//! yields long-term credentials; Pair-Verify re-authenticates with those
//! credentials on every reconnect and yields fresh session keys.

pub mod setup;
pub mod storage;
pub mod tlv;
pub mod verify;

pub use setup::PairSetup;
pub use storage::{CredentialStorage, Credentials, FileStorage, MemoryStorage, StorageError};
pub use tlv::{TlvEncoder, TlvError, TlvItems, TlvTag};
pub use verify::{PairVerify, TransportKeys};

use crate::protocol::crypto::CryptoError;

/// Pairing errors
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// The device sent a well-formed message that does not fit the protocol
    /// at this step (wrong sequence number, unexpected payload)
    #[error("invalid server response: {0}")]
    InvalidServerResponse(&'static str),

    /// The device reported an in-band error code
    #[error("server reported error code {code}")]
    ServerError {
        /// 1-byte code from the error TLV
        code: u8,
    },

    /// A required TLV field was absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The SRP proof exchange failed; wrong PIN or desynchronized exchange
    #[error("proof verification failed")]
    ProofVerificationFailed,

    /// An Ed25519 signature did not verify
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// The device identified itself with an identifier that does not match
    /// the stored credentials
    #[error("server identity mismatch")]
    IdentityMismatch,

    /// Pair-Setup needs the on-screen PIN before it can proceed
    #[error("pairing code has not been provided")]
    PinNotSet,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),
}

impl PairingError {
    /// Check the common in-band failure modes of a received step
    ///
    /// # Errors
    /// Returns `ServerError` if an error TLV is present, or
    /// `InvalidServerResponse` if the echoed sequence number is wrong.
    pub(crate) fn check_step(items: &TlvItems, expected_seq: u8) -> Result<(), PairingError> {
        if let Some(code) = items.error_code() {
            return Err(PairingError::ServerError { code });
        }
        if items.seq()? != expected_seq {
            return Err(PairingError::InvalidServerResponse("unexpected sequence"));
        }
        Ok(())
    }
}
