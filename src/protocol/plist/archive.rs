use super::{PlistEncodeError, PlistValue, encode};

/// Builder for archived-object property lists
///
/// The archive is an object table plus named top-level references. Members
/// reference other table entries with [`PlistValue::Uid`] values, never
/// copies; the remote un-archiver relies on that reference identity when it
/// resolves class descriptions. Slot 0 always holds the `$null` sentinel and
/// every attempt to add it again resolves to slot 0.
pub struct KeyedArchive {
    objects: Vec<PlistValue>,
}

impl KeyedArchive {
    /// Create an archive with the `$null` sentinel in slot 0
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: vec![PlistValue::string("$null")],
        }
    }

    /// Add an object to the table and return its UID index
    ///
    /// The value may itself contain `Uid` members referencing earlier slots.
    pub fn add(&mut self, value: PlistValue) -> u64 {
        if matches!(&value, PlistValue::String(s) if s == "$null") {
            return 0;
        }
        self.objects.push(value);
        (self.objects.len() - 1) as u64
    }

    /// UID of the `$null` sentinel
    #[must_use]
    pub fn null_uid() -> u64 {
        0
    }

    /// Serialize the archive with the given root object
    ///
    /// # Errors
    /// Returns an error if the underlying plist writer fails.
    pub fn finalize(self, root: u64) -> Result<Vec<u8>, PlistEncodeError> {
        let value = PlistValue::dict([
            ("$archiver", PlistValue::string("NSKeyedArchiver")),
            ("$version", PlistValue::Integer(100_000)),
            ("$objects", PlistValue::Array(self.objects)),
            (
                "$top",
                PlistValue::dict([("root", PlistValue::Uid(root))]),
            ),
        ]);
        encode(&value)
    }
}

impl Default for KeyedArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::decode;
    use super::*;

    #[test]
    fn test_null_sentinel_deduplicated() {
        let mut archive = KeyedArchive::new();
        assert_eq!(archive.add(PlistValue::string("$null")), 0);
        assert_eq!(archive.add(PlistValue::string("text")), 1);
        assert_eq!(archive.add(PlistValue::string("$null")), 0);
    }

    #[test]
    fn test_archive_structure_survives_reparse() {
        let mut archive = KeyedArchive::new();

        let title = archive.add(PlistValue::string(
            "a string long enough to trigger extended length encoding",
        ));
        let blob = archive.add(PlistValue::Data(vec![0x11, 0x22, 0x33]));
        let names = archive.add(PlistValue::Array(vec![
            PlistValue::string("first"),
            PlistValue::string("second"),
        ]));
        let root = archive.add(PlistValue::dict([
            ("title", PlistValue::Uid(title)),
            ("payload", PlistValue::Uid(blob)),
            ("names", PlistValue::Uid(names)),
        ]));

        let bytes = archive.finalize(root).unwrap();
        let parsed = decode(&bytes).unwrap();

        assert_eq!(
            parsed.get("$archiver").and_then(PlistValue::as_str),
            Some("NSKeyedArchiver")
        );
        assert_eq!(
            parsed.get("$version").and_then(PlistValue::as_i64),
            Some(100_000)
        );

        let objects = parsed.get("$objects").and_then(PlistValue::as_array).unwrap();
        assert_eq!(objects[0], PlistValue::string("$null"));
        assert_eq!(
            objects[usize::try_from(blob).unwrap()],
            PlistValue::Data(vec![0x11, 0x22, 0x33])
        );

        // Members are UID references, not copies
        let root_obj = &objects[usize::try_from(root).unwrap()];
        assert_eq!(root_obj.get("title"), Some(&PlistValue::Uid(title)));

        let top = parsed.get("$top").unwrap();
        assert_eq!(top.get("root"), Some(&PlistValue::Uid(root)));
    }
}
