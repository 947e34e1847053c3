//! Media-remote protocol messages
//!
//! Hand-written prost definitions for the message subset this client
//! exchanges. Every message travels inside a `ProtocolMessage` envelope
//! whose `type` field selects the payload; requests carry a random
//! identifier token the peer echoes in its reply.

#![allow(missing_docs)]

use prost::Message;

/// Protocol envelope
#[derive(Clone, PartialEq, Message)]
pub struct ProtocolMessage {
    /// Message type discriminator
    #[prost(enumeration = "MessageType", tag = "1")]
    pub r#type: i32,
    /// Correlation token echoed by the peer
    #[prost(string, optional, tag = "2")]
    pub identifier: Option<String>,
    /// Priority hint
    #[prost(int32, optional, tag = "3")]
    pub priority: Option<i32>,

    #[prost(message, optional, tag = "20")]
    pub device_info_message: Option<DeviceInfoMessage>,
    #[prost(message, optional, tag = "21")]
    pub set_connection_state_message: Option<SetConnectionStateMessage>,
    #[prost(message, optional, tag = "22")]
    pub client_updates_config_message: Option<ClientUpdatesConfigMessage>,
    #[prost(message, optional, tag = "23")]
    pub playback_queue_request_message: Option<PlaybackQueueRequestMessage>,
    #[prost(message, optional, tag = "24")]
    pub set_state_message: Option<SetStateMessage>,
    #[prost(message, optional, tag = "25")]
    pub update_content_item_message: Option<UpdateContentItemMessage>,
    #[prost(message, optional, tag = "26")]
    pub send_command_message: Option<SendCommandMessage>,
    #[prost(message, optional, tag = "27")]
    pub send_command_result_message: Option<SendCommandResultMessage>,
    #[prost(message, optional, tag = "28")]
    pub volume_control_availability_message: Option<VolumeControlAvailabilityMessage>,
}

/// Message type values
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Unknown = 0,
    SendCommand = 1,
    SendCommandResult = 2,
    GetState = 3,
    SetState = 4,
    SetArtwork = 5,
    Notification = 11,
    ContentItemsChangedNotification = 12,
    DeviceInfo = 15,
    ClientUpdatesConfig = 16,
    VolumeControlAvailability = 17,
    Keyboard = 23,
    PlaybackQueueRequest = 30,
    SetConnectionState = 32,
    UpdateContentItem = 43,
    WakeDevice = 58,
    Generic = 64,
}

impl ProtocolMessage {
    /// Create an envelope of the given type
    #[must_use]
    pub fn with_type(message_type: MessageType) -> Self {
        Self {
            r#type: message_type as i32,
            ..Self::default()
        }
    }

    /// The envelope's message type, if recognized
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.r#type).ok()
    }
}

/// Client capability announcement
#[derive(Clone, PartialEq, Message)]
pub struct DeviceInfoMessage {
    #[prost(string, tag = "1")]
    pub unique_identifier: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, optional, tag = "3")]
    pub localized_model_name: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub system_build_version: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub application_bundle_identifier: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub application_bundle_version: Option<String>,
    #[prost(int32, optional, tag = "7")]
    pub protocol_version: Option<i32>,
    #[prost(bool, optional, tag = "9")]
    pub supports_system_pairing: Option<bool>,
    #[prost(bool, optional, tag = "11")]
    pub connected: Option<bool>,
    #[prost(bool, optional, tag = "14")]
    pub supports_shared_queue: Option<bool>,
}

/// Connection state announcement
#[derive(Clone, PartialEq, Message)]
pub struct SetConnectionStateMessage {
    #[prost(enumeration = "ConnectionStateValue", tag = "1")]
    pub state: i32,
}

/// Connection state values
#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionStateValue {
    Unspecified = 0,
    Connecting = 1,
    Connected = 2,
    Disconnected = 3,
}

/// Update subscription configuration
#[derive(Clone, PartialEq, Message)]
pub struct ClientUpdatesConfigMessage {
    #[prost(bool, tag = "1")]
    pub artwork_updates: bool,
    #[prost(bool, tag = "2")]
    pub now_playing_updates: bool,
    #[prost(bool, tag = "3")]
    pub volume_updates: bool,
    #[prost(bool, tag = "4")]
    pub keyboard_updates: bool,
    #[prost(bool, tag = "5")]
    pub output_device_updates: bool,
}

/// Playback queue fetch request
#[derive(Clone, PartialEq, Message)]
pub struct PlaybackQueueRequestMessage {
    #[prost(int32, tag = "1")]
    pub location: i32,
    #[prost(int32, tag = "2")]
    pub length: i32,
    #[prost(bool, optional, tag = "3")]
    pub include_metadata: Option<bool>,
    #[prost(double, optional, tag = "4")]
    pub artwork_width: Option<f64>,
    #[prost(double, optional, tag = "5")]
    pub artwork_height: Option<f64>,
}

/// Full player state
#[derive(Clone, PartialEq, Message)]
pub struct SetStateMessage {
    #[prost(message, optional, tag = "1")]
    pub playback_queue: Option<PlaybackQueue>,
    #[prost(message, optional, tag = "4")]
    pub supported_commands: Option<SupportedCommands>,
    #[prost(enumeration = "PlaybackStateValue", optional, tag = "6")]
    pub playback_state: Option<i32>,
}

/// Playback state values
#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum PlaybackStateValue {
    Unspecified = 0,
    Playing = 1,
    Paused = 2,
    Stopped = 3,
    Interrupted = 4,
    Seeking = 5,
}

/// Ordered content queue
#[derive(Clone, PartialEq, Message)]
pub struct PlaybackQueue {
    #[prost(int32, tag = "1")]
    pub location: i32,
    #[prost(message, repeated, tag = "2")]
    pub content_items: Vec<ContentItem>,
}

/// One queue entry
#[derive(Clone, PartialEq, Message)]
pub struct ContentItem {
    #[prost(string, tag = "1")]
    pub identifier: String,
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<ContentItemMetadata>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub artwork_data: Option<Vec<u8>>,
}

/// Metadata for a queue entry
#[derive(Clone, PartialEq, Message)]
pub struct ContentItemMetadata {
    #[prost(string, optional, tag = "1")]
    pub title: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub track_artist_name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub album_name: Option<String>,
    #[prost(double, optional, tag = "4")]
    pub duration: Option<f64>,
    #[prost(double, optional, tag = "5")]
    pub elapsed_time: Option<f64>,
    #[prost(float, optional, tag = "6")]
    pub playback_rate: Option<f32>,
    #[prost(bool, optional, tag = "7")]
    pub artwork_available: Option<bool>,
    #[prost(string, optional, tag = "8")]
    pub artwork_mime_type: Option<String>,
}

/// Delta update of queue entries
#[derive(Clone, PartialEq, Message)]
pub struct UpdateContentItemMessage {
    #[prost(message, repeated, tag = "1")]
    pub content_items: Vec<ContentItem>,
}

/// Commands supported by the current player
#[derive(Clone, PartialEq, Message)]
pub struct SupportedCommands {
    #[prost(message, repeated, tag = "1")]
    pub supported_commands: Vec<CommandInfo>,
}

/// One command's availability
#[derive(Clone, PartialEq, Message)]
pub struct CommandInfo {
    #[prost(enumeration = "Command", tag = "1")]
    pub command: i32,
    #[prost(bool, optional, tag = "2")]
    pub enabled: Option<bool>,
}

/// Player command values
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum Command {
    Unknown = 0,
    Play = 1,
    Pause = 2,
    TogglePlayPause = 3,
    Stop = 4,
    NextTrack = 5,
    PreviousTrack = 6,
    AdvanceShuffleMode = 7,
    AdvanceRepeatMode = 8,
    SeekToPlaybackPosition = 45,
}

/// Command dispatch
#[derive(Clone, PartialEq, Message)]
pub struct SendCommandMessage {
    #[prost(enumeration = "Command", tag = "1")]
    pub command: i32,
    #[prost(message, optional, tag = "2")]
    pub options: Option<CommandOptions>,
}

/// Command options
#[derive(Clone, PartialEq, Message)]
pub struct CommandOptions {
    #[prost(double, optional, tag = "1")]
    pub skip_interval: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub playback_position: Option<f64>,
}

/// Result of a dispatched command
#[derive(Clone, PartialEq, Message)]
pub struct SendCommandResultMessage {
    #[prost(int32, optional, tag = "1")]
    pub send_error: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub handler_return_status: Option<i32>,
}

/// Volume control availability
#[derive(Clone, PartialEq, Message)]
pub struct VolumeControlAvailabilityMessage {
    #[prost(bool, tag = "1")]
    pub volume_control_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_first_byte_is_type_key() {
        // The type field's key (field 1, varint) encodes as 0x08; the
        // unprefixed-payload heuristic in the data channel depends on it.
        let message = ProtocolMessage::with_type(MessageType::DeviceInfo);
        let encoded = message.encode_to_vec();
        assert_eq!(encoded[0], 0x08);
        assert_eq!(encoded[1], 15);
    }

    #[test]
    fn test_roundtrip_device_info() {
        let mut message = ProtocolMessage::with_type(MessageType::DeviceInfo);
        message.identifier = Some("ABCD-1234".to_string());
        message.device_info_message = Some(DeviceInfoMessage {
            unique_identifier: "client-uid".to_string(),
            name: "tvremote".to_string(),
            protocol_version: Some(1),
            ..DeviceInfoMessage::default()
        });

        let decoded = ProtocolMessage::decode(&message.encode_to_vec()[..]).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.message_type(), Some(MessageType::DeviceInfo));
    }

    #[test]
    fn test_unknown_type_value_tolerated() {
        let message = ProtocolMessage {
            r#type: 9999,
            ..ProtocolMessage::default()
        };
        let decoded = ProtocolMessage::decode(&message.encode_to_vec()[..]).unwrap();
        assert_eq!(decoded.message_type(), None);
    }

    #[test]
    fn test_set_state_roundtrip() {
        let mut message = ProtocolMessage::with_type(MessageType::SetState);
        message.set_state_message = Some(SetStateMessage {
            playback_queue: Some(PlaybackQueue {
                location: 0,
                content_items: vec![ContentItem {
                    identifier: "item-1".to_string(),
                    metadata: Some(ContentItemMetadata {
                        title: Some("Track".to_string()),
                        playback_rate: Some(1.0),
                        ..ContentItemMetadata::default()
                    }),
                    artwork_data: None,
                }],
            }),
            supported_commands: None,
            playback_state: Some(PlaybackStateValue::Playing as i32),
        });

        let decoded = ProtocolMessage::decode(&message.encode_to_vec()[..]).unwrap();
        assert_eq!(decoded, message);
    }
}
