//! Table-of-contents codec.
//!
//! A TOC file is a fixed header followed by `entry_count` fixed-size entries,
//! all little-endian:
//!
//! ```text
//! header (20 bytes): magic[8] | header_size u32 | entry_size u32 | entry_count u32
//! entry  (48 bytes): chunk_id[32] | offset u64 | length u64
//! ```
//!
//! The two size fields act as the format version: a reader only accepts the
//! exact record sizes it was built for.

use std::collections::HashMap;

use iostore_types::{ChunkId, CHUNK_ID_SIZE};

use crate::error::TocFormatError;

/// Magic signature at the start of every TOC file.
pub const TOC_MAGIC: [u8; 8] = *b"IOSTOC\0\x01";

/// Serialized size of [`TocHeader`].
pub const TOC_HEADER_SIZE: u32 = 20;

/// Serialized size of one [`TocEntry`].
pub const TOC_ENTRY_SIZE: u32 = (CHUNK_ID_SIZE + 16) as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TocHeader {
    pub magic: [u8; 8],
    pub header_size: u32,
    pub entry_size: u32,
    pub entry_count: u32,
}

impl TocHeader {
    /// A header describing `entry_count` entries in the current format.
    pub fn new(entry_count: u32) -> Self {
        Self {
            magic: TOC_MAGIC,
            header_size: TOC_HEADER_SIZE,
            entry_size: TOC_ENTRY_SIZE,
            entry_count,
        }
    }

    pub fn to_bytes(&self) -> [u8; TOC_HEADER_SIZE as usize] {
        let mut buf = [0u8; TOC_HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..12].copy_from_slice(&self.header_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.entry_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    /// Decode and validate a header from the start of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TocFormatError> {
        if data.len() < TOC_HEADER_SIZE as usize {
            return Err(TocFormatError::Truncated {
                needed: TOC_HEADER_SIZE as u64,
                actual: data.len() as u64,
            });
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        if magic != TOC_MAGIC {
            return Err(TocFormatError::InvalidMagic {
                actual: magic.to_vec(),
            });
        }
        let header = Self {
            magic,
            header_size: read_u32(data, 8),
            entry_size: read_u32(data, 12),
            entry_count: read_u32(data, 16),
        };
        if header.header_size != TOC_HEADER_SIZE {
            return Err(TocFormatError::HeaderSize {
                expected: TOC_HEADER_SIZE,
                actual: header.header_size,
            });
        }
        if header.entry_size != TOC_ENTRY_SIZE {
            return Err(TocFormatError::EntrySize {
                expected: TOC_ENTRY_SIZE,
                actual: header.entry_size,
            });
        }
        Ok(header)
    }

    /// Total TOC size implied by this header.
    pub fn toc_size(&self) -> u64 {
        self.header_size as u64 + self.entry_count as u64 * self.entry_size as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TocEntry {
    pub chunk_id: ChunkId,
    pub offset: u64,
    pub length: u64,
}

impl TocEntry {
    pub fn new(chunk_id: ChunkId, offset: u64, length: u64) -> Self {
        Self {
            chunk_id,
            offset,
            length,
        }
    }

    /// Exclusive end of the entry's range, `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }

    pub fn to_bytes(&self) -> [u8; TOC_ENTRY_SIZE as usize] {
        let mut buf = [0u8; TOC_ENTRY_SIZE as usize];
        buf[..CHUNK_ID_SIZE].copy_from_slice(self.chunk_id.as_bytes());
        buf[CHUNK_ID_SIZE..CHUNK_ID_SIZE + 8].copy_from_slice(&self.offset.to_le_bytes());
        buf[CHUNK_ID_SIZE + 8..].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Decode one entry; `data` must hold at least [`TOC_ENTRY_SIZE`] bytes.
    fn decode(data: &[u8]) -> Self {
        let mut id = [0u8; CHUNK_ID_SIZE];
        id.copy_from_slice(&data[..CHUNK_ID_SIZE]);
        Self {
            chunk_id: ChunkId::from_raw(id),
            offset: read_u64(data, CHUNK_ID_SIZE),
            length: read_u64(data, CHUNK_ID_SIZE + 8),
        }
    }
}

/// A decoded, validated table of contents.
#[derive(Clone, Debug)]
pub struct Toc {
    pub header: TocHeader,
    entries: HashMap<ChunkId, TocEntry>,
}

impl Toc {
    /// Decode a TOC and check every entry against a data file of
    /// `data_size` bytes.
    ///
    /// Rejects a bad header, a truncated entry table, entries past the end
    /// of the data file, the invalid chunk id, and duplicate ids.
    pub fn parse(data: &[u8], data_size: u64) -> Result<Self, TocFormatError> {
        let header = TocHeader::from_bytes(data)?;
        let needed = header.toc_size();
        if (data.len() as u64) < needed {
            return Err(TocFormatError::Truncated {
                needed,
                actual: data.len() as u64,
            });
        }

        let mut entries = HashMap::with_capacity(header.entry_count as usize);
        let table = &data[TOC_HEADER_SIZE as usize..needed as usize];
        for (index, raw) in table.chunks_exact(TOC_ENTRY_SIZE as usize).enumerate() {
            let entry = TocEntry::decode(raw);
            if !entry.chunk_id.is_valid() {
                return Err(TocFormatError::InvalidChunkId { index });
            }
            match entry.end() {
                Some(end) if end <= data_size => {}
                _ => {
                    return Err(TocFormatError::EntryOutOfRange {
                        index,
                        id: entry.chunk_id,
                        offset: entry.offset,
                        length: entry.length,
                        data_size,
                    })
                }
            }
            if entries.insert(entry.chunk_id, entry).is_some() {
                return Err(TocFormatError::DuplicateChunkId {
                    index,
                    id: entry.chunk_id,
                });
            }
        }

        Ok(Self { header, entries })
    }

    pub fn get(&self, id: &ChunkId) -> Option<&TocEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TocEntry> {
        self.entries.values()
    }
}

/// Serialize a header plus `entries` into TOC file bytes.
pub fn encode_toc(entries: &[TocEntry]) -> Vec<u8> {
    let header = TocHeader::new(entries.len() as u32);
    let mut buf = Vec::with_capacity(header.toc_size() as usize);
    buf.extend_from_slice(&header.to_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.to_bytes());
    }
    buf
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(b)
}
