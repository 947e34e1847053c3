use std::io;
use thiserror::Error;

use crate::companion::frame::FrameError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::opack::OpackError;
use crate::protocol::pairing::{PairingError, StorageError, TlvError};
use crate::protocol::plist::{PlistDecodeError, PlistEncodeError};

/// Errors that can occur while talking to a device
#[derive(Debug, Error)]
pub enum RemoteError {
    // ===== Connection Errors =====
    /// Failed to establish a connection
    #[error("connection failed to {host}:{port}: {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Target port
        port: u16,
        /// Description of the failure
        message: String,
    },

    /// Connection was closed
    #[error("disconnected: {reason}")]
    Disconnected {
        /// Why the connection ended
        reason: String,
    },

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    // ===== Authentication Errors =====
    /// No stored credentials and no pairing in progress
    #[error("pairing required with device {device_id}")]
    PairingRequired {
        /// The device needing pairing
        device_id: String,
    },

    /// Pairing or verification failed
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Credential storage failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    // ===== Protocol Errors =====
    /// The device sent something the protocol does not allow here
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the problem
        message: String,
    },

    /// Operation is not valid in the current state
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the state is invalid
        message: String,
    },

    // ===== Codec Errors =====
    /// Cryptographic failure (AEAD failures are fatal per channel)
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Value codec failure
    #[error("value codec error: {0}")]
    Opack(#[from] OpackError),

    /// TLV codec failure
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// Frame codec failure
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Property list encoding failure
    #[error("plist encode error: {0}")]
    PlistEncode(#[from] PlistEncodeError),

    /// Property list decoding failure
    #[error("plist decode error: {0}")]
    PlistDecode(#[from] PlistDecodeError),

    /// Protobuf decoding failure
    #[error("protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),
}

impl RemoteError {
    /// Check if this error is recoverable by retrying the whole attempt
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_))
    }

    /// Check if this error indicates connection loss
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::ConnectionFailed { .. } | Self::Network(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RemoteError::Disconnected {
            reason: "remote closed".to_string(),
        };
        assert_eq!(err.to_string(), "disconnected: remote closed");
    }

    #[test]
    fn test_pairing_error_conversion() {
        let err: RemoteError = PairingError::ServerError { code: 2 }.into();
        assert!(matches!(
            err,
            RemoteError::Pairing(PairingError::ServerError { code: 2 })
        ));
    }

    #[test]
    fn test_recoverability() {
        assert!(RemoteError::Timeout.is_recoverable());
        assert!(!RemoteError::Pairing(PairingError::IdentityMismatch).is_recoverable());
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RemoteError>();
    }
}
