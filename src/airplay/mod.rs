//! AirPlay tunnel: HAP channel crypto, control client and channel bring-up

pub mod channels;
pub mod hap;
pub mod http;
pub mod session;
pub mod verify;

pub use channels::{DataStreamChannel, EventChannel};
pub use hap::{HapDecryptor, HapEncryptor};
pub use http::{HttpConnection, HttpRequest, HttpResponse};
pub use session::AirPlaySession;
