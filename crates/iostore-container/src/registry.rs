use std::path::Path;
use std::sync::Arc;

use iostore_types::{ChunkId, ReadOptions};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::chunk::ChunkBytes;
use crate::error::{ContainerError, ContainerResult};
use crate::reader::ContainerReader;

struct Mounted {
    reader: Arc<ContainerReader>,
    priority: i32,
}

/// The set of mounted containers, searched in precedence order.
///
/// Precedence is descending `priority`; containers with equal priority are
/// searched in mount order, so with the default priority the first mounted
/// container wins. Overlay containers that must shadow a base container
/// should be mounted first or with a higher priority.
///
/// Readers are shared: the registry holds one `Arc` and the caller that
/// mounted the reader keeps its own.
#[derive(Default)]
pub struct StoreRegistry {
    mounted: RwLock<Vec<Mounted>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount with the default priority (pure mount order).
    pub fn mount(&self, reader: Arc<ContainerReader>) {
        self.mount_with_priority(reader, 0);
    }

    /// Mount ahead of every container with a lower priority and behind
    /// every container with an equal or higher one.
    ///
    /// Mounting the same reader twice is not deduplicated.
    pub fn mount_with_priority(&self, reader: Arc<ContainerReader>, priority: i32) {
        let mut mounted = self.mounted.write();
        let slot = mounted.partition_point(|m| m.priority >= priority);
        info!(
            container = ?reader.path(),
            priority,
            slot,
            chunks = reader.chunk_count(),
            "mounting container"
        );
        mounted.insert(slot, Mounted { reader, priority });
    }

    /// Unmount one mount of `reader`. Returns `false` if it was not mounted.
    pub fn unmount(&self, reader: &Arc<ContainerReader>) -> bool {
        let mut mounted = self.mounted.write();
        match mounted.iter().position(|m| Arc::ptr_eq(&m.reader, reader)) {
            Some(idx) => {
                mounted.remove(idx);
                info!(container = ?reader.path(), "unmounted container");
                true
            }
            None => {
                warn!(container = ?reader.path(), "unmount of container that is not mounted");
                false
            }
        }
    }

    /// Unmount the first container opened from `base_path`.
    pub fn unmount_path(&self, base_path: &Path) -> bool {
        let mut mounted = self.mounted.write();
        match mounted.iter().position(|m| m.reader.path() == base_path) {
            Some(idx) => {
                mounted.remove(idx);
                info!(container = ?base_path, "unmounted container");
                true
            }
            None => {
                warn!(container = ?base_path, "failed to unmount container");
                false
            }
        }
    }

    /// Copy of the mounted readers in precedence order.
    ///
    /// Resolution works on a snapshot so the registry lock is never held
    /// while probing containers.
    pub fn snapshot(&self) -> MountSnapshot {
        MountSnapshot {
            readers: self
                .mounted
                .read()
                .iter()
                .map(|m| Arc::clone(&m.reader))
                .collect(),
        }
    }

    pub fn resolve(&self, id: &ChunkId) -> ContainerResult<ChunkBytes> {
        self.snapshot().resolve(id)
    }

    pub fn resolve_with(&self, id: &ChunkId, options: ReadOptions) -> ContainerResult<ChunkBytes> {
        self.snapshot().resolve_with(id, options)
    }

    pub fn size_for_chunk(&self, id: &ChunkId) -> ContainerResult<u64> {
        self.snapshot().size_for_chunk(id)
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.mounted.read().iter().any(|m| m.reader.contains(id))
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.read().len()
    }

    /// Total chunks across all mounts (duplicates counted once per mount).
    pub fn total_chunks(&self) -> usize {
        self.mounted.read().iter().map(|m| m.reader.chunk_count()).sum()
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("mounted", &self.mounted_count())
            .finish()
    }
}

/// Mounted readers captured at one point in time, in precedence order.
#[derive(Clone, Debug, Default)]
pub struct MountSnapshot {
    readers: Vec<Arc<ContainerReader>>,
}

impl MountSnapshot {
    pub fn resolve(&self, id: &ChunkId) -> ContainerResult<ChunkBytes> {
        self.resolve_with(id, ReadOptions::whole())
    }

    /// First hit wins; `NotFound` only when every reader misses.
    pub fn resolve_with(&self, id: &ChunkId, options: ReadOptions) -> ContainerResult<ChunkBytes> {
        for reader in &self.readers {
            match reader.read(id, options) {
                Err(ContainerError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(ContainerError::NotFound(*id))
    }

    pub fn size_for_chunk(&self, id: &ChunkId) -> ContainerResult<u64> {
        for reader in &self.readers {
            match reader.size_of_chunk(id) {
                Err(ContainerError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(ContainerError::NotFound(*id))
    }

    pub fn readers(&self) -> &[Arc<ContainerReader>] {
        &self.readers
    }
}
