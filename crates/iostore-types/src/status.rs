use std::fmt;

use serde::{Deserialize, Serialize};

/// Status vocabulary shared by containers, the dispatcher and the queue.
///
/// Per-request failures are reported with one of these codes; the richer
/// error enums of each crate map onto it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoErrorCode {
    /// The TOC or data file could not be opened, read or mapped.
    FileOpenFailed,
    /// The TOC failed validation.
    CorruptToc,
    /// No mounted container holds the chunk.
    NotFound,
    /// The request named the invalid sentinel id.
    InvalidChunkId,
}

impl IoErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileOpenFailed => "file open failed",
            Self::CorruptToc => "corrupt toc",
            Self::NotFound => "not found",
            Self::InvalidChunkId => "invalid chunk id",
        }
    }
}

impl fmt::Display for IoErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
