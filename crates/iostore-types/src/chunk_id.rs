use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Serialized width of a [`ChunkId`] in bytes.
pub const CHUNK_ID_SIZE: usize = 32;

/// Content-addressed identifier for a stored chunk.
///
/// A `ChunkId` names exactly one logical chunk across every mounted
/// container. The all-zero value is the invalid sentinel: it is never
/// accepted in a table of contents and never resolves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId([u8; CHUNK_ID_SIZE]);

impl ChunkId {
    /// The invalid sentinel (all zeros).
    pub const INVALID: ChunkId = ChunkId([0u8; CHUNK_ID_SIZE]);

    /// Derive a `ChunkId` from chunk content (BLAKE3).
    pub fn from_content(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Wrap raw id bytes as read from a table of contents.
    pub const fn from_raw(bytes: [u8; CHUNK_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns `true` unless this is the invalid sentinel.
    pub fn is_valid(&self) -> bool {
        self.0 != [0u8; CHUNK_ID_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; CHUNK_ID_SIZE] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s.trim()).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; CHUNK_ID_SIZE] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| TypeError::InvalidLength {
                    expected: CHUNK_ID_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.short_hex())
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for ChunkId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; CHUNK_ID_SIZE]> for ChunkId {
    fn from(bytes: [u8; CHUNK_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn from_content_is_deterministic() {
        let a = ChunkId::from_content(b"chunk payload");
        let b = ChunkId::from_content(b"chunk payload");
        assert_eq!(a, b);
        assert_ne!(a, ChunkId::from_content(b"other payload"));
    }

    #[test]
    fn invalid_sentinel() {
        assert!(!ChunkId::INVALID.is_valid());
        assert!(!ChunkId::default().is_valid());
        assert!(ChunkId::from_content(b"x").is_valid());
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = ChunkId::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(matches!(
            ChunkId::from_hex("zz"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn display_is_full_hex() {
        let id = ChunkId::from_content(b"test");
        assert_eq!(format!("{id}").len(), 64);
        assert_eq!(format!("{id:?}"), format!("ChunkId({})", id.short_hex()));
    }

    #[test]
    fn serde_roundtrip() {
        let id = ChunkId::from_content(b"serde test");
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ChunkId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    proptest! {
        #[test]
        fn hex_parse_accepts_any_formatted_id(bytes in any::<[u8; 32]>()) {
            let id = ChunkId::from_raw(bytes);
            prop_assert_eq!(id.to_hex().parse::<ChunkId>().unwrap(), id);
        }
    }
}
