use std::fmt;
use std::ops::{Deref, Range};
use std::sync::Arc;

use memmap2::Mmap;

/// Backing storage of a container's data file.
#[derive(Debug)]
pub(crate) enum MappedData {
    Mmap(Mmap),
    /// Zero-length data files cannot be mapped.
    Empty,
}

impl Deref for MappedData {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            Self::Mmap(mmap) => mmap.as_ref(),
            Self::Empty => &[],
        }
    }
}

/// Zero-copy view of a chunk inside a container's mapped data file.
///
/// Cloning is cheap. The view keeps the mapping alive, so it stays readable
/// even after the container that produced it is unmounted.
#[derive(Clone)]
pub struct ChunkBytes {
    data: Arc<MappedData>,
    range: Range<usize>,
}

impl ChunkBytes {
    /// Caller guarantees `range` lies within `data`.
    pub(crate) fn new(data: Arc<MappedData>, range: Range<usize>) -> Self {
        debug_assert!(range.start <= range.end && range.end <= data.len());
        Self { data, range }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.range.clone()]
    }

    /// Byte offset of this view within the data file.
    pub fn file_offset(&self) -> u64 {
        self.range.start as u64
    }
}

impl Deref for ChunkBytes {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ChunkBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for ChunkBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ChunkBytes {}

impl fmt::Debug for ChunkBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBytes")
            .field("offset", &self.range.start)
            .field("len", &self.len())
            .finish()
    }
}
