//! # tvremote
//!
//! A pure Rust protocol engine for pairing with and controlling Apple TV
//! class media devices over two vendor protocols: the Companion link
//! (pairing, input, app launching) and an AirPlay tunnel carrying the
//! media-remote protocol inside HAP-encrypted channels.
//!
//! Both wire formats are reverse-engineered from device traffic; byte
//! layouts, key-derivation labels and handshake sequencing follow the
//! real device exactly.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tvremote::{MemoryStorage, RemoteClient, RemoteConfig, ServiceEndpoint};
//!
//! # async fn example() -> tvremote::Result<()> {
//! let client = RemoteClient::new(
//!     RemoteConfig::default(),
//!     Box::new(MemoryStorage::new()),
//! );
//!
//! // Endpoints come from the caller's service discovery.
//! let companion = ServiceEndpoint::new("Living Room", "192.168.1.10", 49152);
//! let airplay = ServiceEndpoint::new("Living Room", "192.168.1.10", 7000);
//!
//! client.connect(&companion, &airplay).await?;
//! if client.state() == tvremote::ConnectionState::PairingRequired {
//!     client.submit_pairing_code("1234").await?;
//! }
//!
//! client.send_button(tvremote::Button::Select).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **High-level**: [`RemoteClient`] - connection lifecycle and commands
//! - **Mid-level**: `companion`, `airplay`, `mrp` - the two transports and
//!   the media-remote session
//! - **Low-level**: `protocol` - codecs, crypto and pairing state machines

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core types
pub mod types;

pub mod airplay;
mod client;
pub mod companion;
pub mod mrp;
pub mod protocol;

// Re-exports
pub use client::RemoteClient;
pub use companion::{AppInfo, CompanionConnection};
pub use error::{RemoteError, Result};
pub use mrp::{MrpCommand, MrpSession};
pub use protocol::pairing::{
    CredentialStorage, Credentials, FileStorage, MemoryStorage, PairSetup, PairVerify,
};
pub use types::{
    Button, ConnectionEvent, ConnectionState, DisconnectReason, NowPlaying, PlaybackState,
    RemoteConfig, ServiceEndpoint,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Button, ConnectionEvent, ConnectionState, Credentials, MrpCommand, NowPlaying,
        RemoteClient, RemoteConfig, RemoteError, ServiceEndpoint,
    };
}
