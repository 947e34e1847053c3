//! Companion message envelopes
//!
//! Every non-pairing exchange is a value-codec dictionary with a message
//! type, an optional transaction id and a named payload. Pairing exchanges
//! carry their TLV bytes under `_pd` with a flag declaring the method.

use crate::protocol::opack::{DictBuilder, Value};

/// Envelope dictionary keys
pub mod keys {
    /// Message type (1=event, 2=request, 3=response)
    pub const MESSAGE_TYPE: &str = "_t";
    /// Transaction id
    pub const XID: &str = "_x";
    /// Event or command name
    pub const NAME: &str = "_i";
    /// Content payload
    pub const CONTENT: &str = "_c";
    /// Pairing TLV bytes
    pub const PAIRING_DATA: &str = "_pd";
    /// Password-type pairing flag
    pub const PW_TYPE: &str = "_pwTy";
    /// Auth-type flag (4 = verify)
    pub const AUTH_TYPE: &str = "_auTy";
    /// Button state within HID content
    pub const BUTTON_STATE: &str = "_hBtS";
    /// HID command code within HID content
    pub const HID_COMMAND: &str = "_hidC";
}

/// Envelope message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum MessageType {
    /// Unsolicited event
    Event = 1,
    /// Request expecting a response
    Request = 2,
    /// Response to a request
    Response = 3,
}

impl MessageType {
    /// Parse from the `_t` value
    #[must_use]
    pub fn from_value(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::Event),
            2 => Some(Self::Request),
            3 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Build a request envelope
#[must_use]
pub fn request(name: &str, xid: i64, content: Value) -> Value {
    DictBuilder::new()
        .entry(keys::MESSAGE_TYPE, Value::Int(MessageType::Request as i64))
        .entry(keys::NAME, Value::string(name))
        .entry(keys::CONTENT, content)
        .entry(keys::XID, Value::Int(xid))
        .build()
}

/// Build an event envelope
#[must_use]
pub fn event(name: &str, content: Value) -> Value {
    DictBuilder::new()
        .entry(keys::MESSAGE_TYPE, Value::Int(MessageType::Event as i64))
        .entry(keys::NAME, Value::string(name))
        .entry(keys::CONTENT, content)
        .build()
}

/// Build a Pair-Setup envelope declaring password-type pairing
#[must_use]
pub fn pair_setup(tlv: Vec<u8>) -> Value {
    DictBuilder::new()
        .entry(keys::PAIRING_DATA, Value::bytes(tlv))
        .entry(keys::PW_TYPE, Value::Int(1))
        .build()
}

/// Build a Pair-Verify envelope
#[must_use]
pub fn pair_verify(tlv: Vec<u8>) -> Value {
    DictBuilder::new()
        .entry(keys::PAIRING_DATA, Value::bytes(tlv))
        .entry(keys::AUTH_TYPE, Value::Int(4))
        .build()
}

/// Extract the pairing TLV bytes from an envelope
#[must_use]
pub fn pairing_data(envelope: &Value) -> Option<&[u8]> {
    envelope.get(keys::PAIRING_DATA).and_then(Value::as_bytes)
}

/// Extract the transaction id from an envelope
#[must_use]
pub fn xid(envelope: &Value) -> Option<i64> {
    envelope.get(keys::XID).and_then(Value::as_i64)
}

/// Extract the message type from an envelope
#[must_use]
pub fn message_type(envelope: &Value) -> Option<MessageType> {
    envelope
        .get(keys::MESSAGE_TYPE)
        .and_then(Value::as_i64)
        .and_then(MessageType::from_value)
}
