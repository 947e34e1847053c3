//! Text-input session payloads
//!
//! The on-screen keyboard exchanges archived-object plists over the
//! Companion link: `_tiStart`/`_tiStarted` open a session and `_tiC`
//! carries edits. The archive's class-description entries are shared by
//! UID, which is why the plain plist writer is not sufficient here.

use crate::protocol::opack::{DictBuilder, Value};
use crate::protocol::plist::{KeyedArchive, PlistEncodeError, PlistValue};

/// Companion message names for text input
pub mod messages {
    /// Open a text-input session
    pub const START: &str = "_tiStart";
    /// Device acknowledgment carrying the session state
    pub const STARTED: &str = "_tiStarted";
    /// Text edit command
    pub const COMMAND: &str = "_tiC";
    /// Session ended by the device
    pub const STOPPED: &str = "_tiStopped";
}

/// Build the archived text-operations payload that replaces the current
/// field content with `text`
///
/// # Errors
/// Returns an error if the archive cannot be serialized.
pub fn text_operations(text: &str) -> Result<Vec<u8>, PlistEncodeError> {
    let mut archive = KeyedArchive::new();

    let class = archive.add(PlistValue::dict([
        ("$classname", PlistValue::string("RTIInputOperations")),
        (
            "$classes",
            PlistValue::Array(vec![
                PlistValue::string("RTIInputOperations"),
                PlistValue::string("NSObject"),
            ]),
        ),
    ]));
    let inserted = archive.add(PlistValue::string(text));
    let root = archive.add(PlistValue::dict([
        ("$class", PlistValue::Uid(class)),
        ("textToAssert", PlistValue::Uid(inserted)),
        ("keyboardOutput", PlistValue::Uid(KeyedArchive::null_uid())),
    ]));

    archive.finalize(root)
}

/// Build the `_tiC` envelope content around an archived payload
#[must_use]
pub fn command_content(session_data: &[u8], payload: Vec<u8>) -> Value {
    DictBuilder::new()
        .entry("_tiV", Value::Int(1))
        .entry("_tiD", Value::bytes(session_data.to_vec()))
        .entry("_tiP", Value::bytes(payload))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::plist::decode;

    #[test]
    fn test_text_operations_archive_shape() {
        let bytes = text_operations("hello").unwrap();
        let parsed = decode(&bytes).unwrap();

        let objects = parsed.get("$objects").and_then(PlistValue::as_array).unwrap();
        assert!(objects.iter().any(|o| o.as_str() == Some("hello")));

        // The root must reference its class description by UID.
        let root_uid = parsed
            .get("$top")
            .and_then(|t| t.get("root"))
            .cloned()
            .unwrap();
        let PlistValue::Uid(root_index) = root_uid else {
            panic!("root is not a UID");
        };
        let root = &objects[usize::try_from(root_index).unwrap()];
        assert!(matches!(root.get("$class"), Some(PlistValue::Uid(_))));
        // An unset field points at the $null sentinel, not at a copy.
        assert_eq!(root.get("keyboardOutput"), Some(&PlistValue::Uid(0)));
    }

    #[test]
    fn test_command_content_keys() {
        let content = command_content(&[9, 9], vec![1, 2, 3]);
        assert_eq!(content.get("_tiV").and_then(Value::as_i64), Some(1));
        assert_eq!(content.get("_tiP").and_then(Value::as_bytes), Some(&[1u8, 2, 3][..]));
    }
}
