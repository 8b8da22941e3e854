use sha2::{Digest, Sha256};

/// A stable note identifier derived from the absolute path of its file.
///
/// The identity is the first 128 bits of the SHA-256 digest of the path,
/// hex-encoded. The first 64 bits double as the numeric key used in redb
/// tables and tantivy fast fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteId {
    /// The full 32-character hex identity.
    pub hex: String,
    /// The numeric key used in redb tables.
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3").
    pub short: String,
}

impl NoteId {
    /// Derive the identity for an absolute file path.
    pub fn from_path(path: &str) -> Self {
        let digest = Sha256::digest(path.as_bytes());

        let mut hex = String::with_capacity(32);
        for byte in &digest[..16] {
            hex.push_str(&format!("{byte:02x}"));
        }

        let mut key_bytes = [0u8; 8];
        key_bytes.copy_from_slice(&digest[..8]);
        let numeric = u64::from_le_bytes(key_bytes);

        let short = hex[..6].to_string();

        Self {
            hex,
            numeric,
            short,
        }
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = NoteId::from_path("/notes/hello.md");
        let b = NoteId::from_path("/notes/hello.md");
        assert_eq!(a, b);
    }

    #[test]
    fn different_paths_differ() {
        let a = NoteId::from_path("/notes/hello.md");
        let b = NoteId::from_path("/notes/world.md");
        assert_ne!(a.numeric, b.numeric);
        assert_ne!(a.hex, b.hex);
    }

    #[test]
    fn hex_is_128_bits() {
        let id = NoteId::from_path("/notes/hello.md");
        assert_eq!(id.hex.len(), 32);
        assert!(id.hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn numeric_matches_hex_prefix() {
        let id = NoteId::from_path("/notes/hello.md");
        let mut bytes = [0u8; 8];
        for (i, chunk) in id.hex.as_bytes()[..16].chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).unwrap();
            bytes[i] = u8::from_str_radix(s, 16).unwrap();
        }
        assert_eq!(id.numeric, u64::from_le_bytes(bytes));
    }

    #[test]
    fn display_has_hash_prefix() {
        let id = NoteId::from_path("/notes/hello.md");
        let s = id.to_string();
        assert!(s.starts_with('#'));
        assert_eq!(s.len(), 7); // # + 6 hex chars
    }
}
