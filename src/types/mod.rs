//! Core public types

use std::time::Duration;

/// A resolved service endpoint, as supplied by a discovery provider
///
/// Discovery itself lives outside this crate; callers hand in whatever their
/// resolver produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Advertised service name
    pub service_name: String,
    /// Resolved host address
    pub host: String,
    /// Resolved port
    pub port: u16,
}

impl ServiceEndpoint {
    /// Create an endpoint
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Our pairing identifier, stable across sessions once paired
    pub client_id: String,
    /// Human-readable client name sent in device-info exchanges
    pub name: String,
    /// Timeout for a single request/response exchange
    pub request_timeout: Duration,
    /// Timeout for each tunnel bring-up step
    pub setup_timeout: Duration,
    /// Interval between keep-alive feedback requests
    pub feedback_interval: Duration,
    /// Interval between media-remote heartbeats
    pub heartbeat_interval: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            client_id: format!("{:016X}", rand::random::<u64>()),
            name: "tvremote".to_string(),
            request_timeout: Duration::from_secs(5),
            setup_timeout: Duration::from_secs(10),
            feedback_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Remote control buttons with their wire command codes
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Button {
    Up = 1,
    Down = 2,
    Left = 3,
    Right = 4,
    Menu = 5,
    Select = 6,
    Home = 7,
    VolumeUp = 8,
    VolumeDown = 9,
    Siri = 10,
    Screensaver = 11,
    Sleep = 12,
    Wake = 13,
    PlayPause = 14,
    ChannelUp = 15,
    ChannelDown = 16,
    Guide = 17,
    PageUp = 18,
    PageDown = 19,
}

impl Button {
    /// Wire command code
    #[must_use]
    pub fn code(self) -> i64 {
        self as i64
    }
}

/// High-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// No stored credentials; a pairing code is needed
    PairingRequired,
    /// Fully connected and verified
    Connected,
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Caller asked for it
    Requested,
    /// The device closed the connection
    RemoteClosed,
    /// A transport or protocol error ended the session
    Error(String),
}

/// Connection lifecycle events observable by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state changed
    StateChanged(ConnectionState),
    /// The connection ended
    Disconnected(DisconnectReason),
    /// A fresh now-playing projection is available
    NowPlaying(NowPlaying),
}

/// Playback state of the current content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing known to be playing
    #[default]
    Idle,
    /// Actively playing
    Playing,
    /// Paused
    Paused,
}

/// Simplified now-playing projection
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NowPlaying {
    /// Content title
    pub title: Option<String>,
    /// Artist name
    pub artist: Option<String>,
    /// Album name
    pub album: Option<String>,
    /// Total duration in seconds
    pub duration: Option<f64>,
    /// Elapsed position in seconds
    pub position: Option<f64>,
    /// Playback rate; 0.0 means paused
    pub playback_rate: Option<f64>,
    /// Playback state derived from the rate
    pub state: PlaybackState,
    /// Artwork image bytes, withheld across content changes until refreshed
    pub artwork: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_codes() {
        assert_eq!(Button::Up.code(), 1);
        assert_eq!(Button::Select.code(), 6);
        assert_eq!(Button::PlayPause.code(), 14);
        assert_eq!(Button::PageDown.code(), 19);
    }

    #[test]
    fn test_default_config() {
        let config = RemoteConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.client_id.len(), 16);
    }
}
