use std::path::PathBuf;

use iostore_types::{ChunkId, IoErrorCode};
use thiserror::Error;

/// Reasons a table of contents is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TocFormatError {
    #[error("invalid toc magic: got {actual:02x?}")]
    InvalidMagic { actual: Vec<u8> },

    #[error("toc header size mismatch: expected {expected}, got {actual}")]
    HeaderSize { expected: u32, actual: u32 },

    #[error("toc entry size mismatch: expected {expected}, got {actual}")]
    EntrySize { expected: u32, actual: u32 },

    #[error("toc truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: u64, actual: u64 },

    #[error("entry {index} ({id}) spans {offset}+{length}, beyond data size {data_size}")]
    EntryOutOfRange {
        index: usize,
        id: ChunkId,
        offset: u64,
        length: u64,
        data_size: u64,
    },

    #[error("entry {index} uses the invalid chunk id")]
    InvalidChunkId { index: usize },

    #[error("entry {index} duplicates chunk id {id}")]
    DuplicateChunkId { index: usize, id: ChunkId },
}

#[derive(Debug, Error)]
pub enum ContainerError {
    /// A container file could not be opened, mapped or read.
    #[error("failed to open container file {path:?}: {source}")]
    FileOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt toc {path:?}: {reason}")]
    CorruptToc {
        path: PathBuf,
        #[source]
        reason: TocFormatError,
    },

    #[error("chunk not found: {0}")]
    NotFound(ChunkId),
}

impl ContainerError {
    /// The shared status code for this error.
    pub fn code(&self) -> IoErrorCode {
        match self {
            Self::FileOpenFailed { .. } => IoErrorCode::FileOpenFailed,
            Self::CorruptToc { .. } => IoErrorCode::CorruptToc,
            Self::NotFound(_) => IoErrorCode::NotFound,
        }
    }
}

pub type ContainerResult<T> = Result<T, ContainerError>;
