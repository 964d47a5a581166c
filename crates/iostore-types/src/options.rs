use serde::{Deserialize, Serialize};

/// Sub-range selection for a chunk read.
///
/// The resolved range starts `offset` bytes into the chunk and spans at most
/// `size` bytes. An offset past the end of the chunk resolves to an empty
/// range rather than an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    pub offset: u64,
    pub size: u64,
}

impl ReadOptions {
    /// Read `size` bytes starting at `offset`.
    pub const fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Read the whole chunk.
    pub const fn whole() -> Self {
        Self {
            offset: 0,
            size: u64::MAX,
        }
    }

    /// Clamp these options against a chunk of `length` bytes.
    ///
    /// Returns `(start, len)` relative to the start of the chunk.
    pub fn clamp(&self, length: u64) -> (u64, u64) {
        if self.offset > length {
            return (length, 0);
        }
        (self.offset, self.size.min(length - self.offset))
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::whole()
    }
}
