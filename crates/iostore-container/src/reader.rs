use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use iostore_types::{ChunkId, ReadOptions};
use memmap2::Mmap;
use tracing::{debug, info};

use crate::chunk::{ChunkBytes, MappedData};
use crate::error::{ContainerError, ContainerResult};
use crate::toc::{Toc, TocEntry};

/// Extension of the table-of-contents file.
pub const TOC_EXTENSION: &str = "toc";

/// Extension of the paired data file.
pub const DATA_EXTENSION: &str = "cas";

/// `<base>.<extension>`, keeping any dots already in the base name.
pub fn container_file(base_path: &Path, extension: &str) -> PathBuf {
    let mut name = base_path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Read-only access to one validated container.
///
/// A container is a `<base>.toc` index plus a `<base>.cas` data blob. The
/// data blob is memory-mapped once at open time; lookups are pure memory
/// operations that hand out [`ChunkBytes`] views into the mapping.
pub struct ContainerReader {
    base_path: PathBuf,
    toc: Toc,
    data: Arc<MappedData>,
}

impl ContainerReader {
    /// Open and validate the container at `base_path`.
    ///
    /// Fails with [`ContainerError::FileOpenFailed`] when either file cannot
    /// be opened or mapped, and with [`ContainerError::CorruptToc`] when the
    /// header or any entry fails validation. No reader is produced on
    /// failure.
    pub fn open(base_path: impl AsRef<Path>) -> ContainerResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        let toc_path = container_file(&base_path, TOC_EXTENSION);
        let data_path = container_file(&base_path, DATA_EXTENSION);
        debug!(toc = ?toc_path, "reading toc");

        let mut toc_file = File::open(&toc_path).map_err(|source| {
            ContainerError::FileOpenFailed {
                path: toc_path.clone(),
                source,
            }
        })?;
        let data_file = File::open(&data_path).map_err(|source| {
            ContainerError::FileOpenFailed {
                path: data_path.clone(),
                source,
            }
        })?;

        let mut toc_bytes = Vec::new();
        toc_file
            .read_to_end(&mut toc_bytes)
            .map_err(|source| ContainerError::FileOpenFailed {
                path: toc_path.clone(),
                source,
            })?;

        let data_size = data_file
            .metadata()
            .map_err(|source| ContainerError::FileOpenFailed {
                path: data_path.clone(),
                source,
            })?
            .len();

        let data = if data_size == 0 {
            MappedData::Empty
        } else {
            // SAFETY: the mapping is read-only and never handed out mutably.
            // Containers are immutable once written; truncating the file
            // underneath a live mapping is outside the supported contract.
            let mmap = unsafe { Mmap::map(&data_file) }.map_err(|source| {
                ContainerError::FileOpenFailed {
                    path: data_path.clone(),
                    source,
                }
            })?;
            MappedData::Mmap(mmap)
        };

        // Validate against the mapped length so every view stays in bounds.
        let toc = Toc::parse(&toc_bytes, data.len() as u64).map_err(|reason| {
            ContainerError::CorruptToc {
                path: toc_path.clone(),
                reason,
            }
        })?;

        info!(
            container = ?base_path,
            chunks = toc.len(),
            data_size = data.len(),
            "opened container"
        );

        Ok(Self {
            base_path,
            toc,
            data: Arc::new(data),
        })
    }

    /// Zero-copy view of the whole chunk.
    pub fn lookup(&self, id: &ChunkId) -> ContainerResult<ChunkBytes> {
        self.read(id, ReadOptions::whole())
    }

    /// Zero-copy view of the window `options` selects within the chunk.
    pub fn read(&self, id: &ChunkId, options: ReadOptions) -> ContainerResult<ChunkBytes> {
        let entry = self.entry(id)?;
        let (start, len) = options.clamp(entry.length);
        // Entries were checked against the mapped length at open.
        let begin = (entry.offset + start) as usize;
        Ok(ChunkBytes::new(
            Arc::clone(&self.data),
            begin..begin + len as usize,
        ))
    }

    /// Length of the chunk without touching its bytes.
    pub fn size_of_chunk(&self, id: &ChunkId) -> ContainerResult<u64> {
        Ok(self.entry(id)?.length)
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.toc.get(id).is_some()
    }

    fn entry(&self, id: &ChunkId) -> ContainerResult<&TocEntry> {
        self.toc.get(id).ok_or(ContainerError::NotFound(*id))
    }

    pub fn chunk_count(&self) -> usize {
        self.toc.len()
    }

    /// All entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &TocEntry> {
        self.toc.entries()
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.toc.entries().map(|e| e.chunk_id)
    }

    /// Size of the mapped data file.
    pub fn data_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Base path the container was opened from (without extension).
    pub fn path(&self) -> &Path {
        &self.base_path
    }
}

impl std::fmt::Debug for ContainerReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerReader")
            .field("path", &self.base_path)
            .field("chunks", &self.toc.len())
            .field("data_size", &self.data.len())
            .finish()
    }
}
