use std::fmt;

/// Longest encoded key that still fits a bucket directory name: the 255-byte
/// file name limit minus the `@` separator and a 32-digit instance id.
pub const MAX_ENCODED_LEN: usize = 222;

/// Routing key identifying the entity whose items must be processed in order.
///
/// On disk a key is stored percent-encoded so that any key maps onto a single
/// valid path component and decodes back losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Create a key, returning `None` for empty or blank values
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form of the key
    pub fn encoded(&self) -> String {
        let mut encoded = String::with_capacity(self.0.len());
        for (index, byte) in self.0.bytes().enumerate() {
            let plain = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':' | b'.');
            if plain && !(index == 0 && byte == b'.') {
                encoded.push(byte as char);
            } else {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        }
        encoded
    }

    /// True when the key can name a bucket on disk
    pub fn fits_bucket_name(&self) -> bool {
        self.encoded().len() <= MAX_ENCODED_LEN
    }

    /// Inverse of [`Key::encoded`]
    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = encoded.as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut index = 0;
        while index < bytes.len() {
            if bytes[index] == b'%' {
                let hex = encoded.get(index + 1..index + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                index += 3;
            } else {
                decoded.push(bytes[index]);
                index += 1;
            }
        }
        Self::new(String::from_utf8(decoded).ok()?)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_keys_are_refused() {
        assert!(Key::new("").is_none());
        assert!(Key::new("   ").is_none());
    }

    #[test]
    fn test_nbn_is_stored_verbatim() {
        let key = Key::new("urn:nbn:nl:ui:13-4x-9ah3").unwrap();
        assert_eq!(key.encoded(), "urn:nbn:nl:ui:13-4x-9ah3");
    }

    #[test]
    fn test_separators_and_slashes_are_escaped() {
        let key = Key::new("a/b@c%d e").unwrap();
        let encoded = key.encoded();
        assert_eq!(encoded, "a%2Fb%40c%25d%20e");
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('@'));
        assert_eq!(Key::decode(&encoded), Some(key));
    }

    #[test]
    fn test_leading_dot_is_escaped() {
        let key = Key::new("..").unwrap();
        assert_eq!(key.encoded(), "%2E.");
        assert_eq!(Key::decode("%2E.").unwrap().as_str(), "..");
    }

    #[test]
    fn test_decode_rejects_truncated_escape() {
        assert!(Key::decode("abc%2").is_none());
        assert!(Key::decode("abc%zz").is_none());
    }

    #[test]
    fn test_bucket_name_length_limit() {
        assert!(Key::new("k".repeat(MAX_ENCODED_LEN)).unwrap().fits_bucket_name());
        assert!(!Key::new("k".repeat(MAX_ENCODED_LEN + 1)).unwrap().fits_bucket_name());
        // escapes count three bytes each
        assert!(!Key::new("/".repeat(75)).unwrap().fits_bucket_name());
    }

    #[test]
    fn test_non_ascii_round_trips() {
        let key = Key::new("dataset-é").unwrap();
        assert_eq!(Key::decode(&key.encoded()), Some(key));
    }
}
