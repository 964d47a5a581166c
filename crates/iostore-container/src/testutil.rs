//! Helpers for writing container fixtures in tests.

use std::path::{Path, PathBuf};

use iostore_types::ChunkId;

use crate::reader::{container_file, DATA_EXTENSION, TOC_EXTENSION};
use crate::toc::{encode_toc, TocEntry};

/// Deterministic chunk id for a test tag.
pub fn chunk_id(tag: &[u8]) -> ChunkId {
    ChunkId::from_content(tag)
}

/// Write `<dir>/<name>.toc` and `<dir>/<name>.cas`; returns the base path.
pub fn write_container(dir: &Path, name: &str, entries: &[TocEntry], data: &[u8]) -> PathBuf {
    write_raw(dir, name, &encode_toc(entries), data)
}

/// Write arbitrary TOC bytes next to a data file; returns the base path.
pub fn write_raw(dir: &Path, name: &str, toc: &[u8], data: &[u8]) -> PathBuf {
    let base = dir.join(name);
    std::fs::write(container_file(&base, TOC_EXTENSION), toc).expect("write toc fixture");
    std::fs::write(container_file(&base, DATA_EXTENSION), data).expect("write data fixture");
    base
}

/// Lay out `chunks` back to back in one container; returns the base path.
pub fn write_chunks<P: AsRef<[u8]>>(dir: &Path, name: &str, chunks: &[(ChunkId, P)]) -> PathBuf {
    let mut data = Vec::new();
    let mut entries = Vec::with_capacity(chunks.len());
    for (id, payload) in chunks {
        let payload = payload.as_ref();
        entries.push(TocEntry::new(*id, data.len() as u64, payload.len() as u64));
        data.extend_from_slice(payload);
    }
    write_container(dir, name, &entries, &data)
}
