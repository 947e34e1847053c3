//! Companion link: framing, transport crypto, connection and commands

pub mod connection;
pub mod crypto;
pub mod envelope;
pub mod frame;
pub mod keyboard;
pub mod protocol;

pub use connection::{CompanionConnection, CompanionEvent};
pub use crypto::{CompanionDecryptor, CompanionEncryptor};
pub use frame::{Frame, FrameError, FrameType};
pub use protocol::{AppInfo, CompanionApi, PairingSession};
