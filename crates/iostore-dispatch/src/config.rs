use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, DispatchResult};

/// Slab sizing for the dispatcher's allocators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Requests per allocator block.
    pub request_block_size: usize,
    /// Batches per allocator block.
    pub batch_block_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_block_size: 256,
            batch_block_size: 32,
        }
    }
}

/// Configuration for an [`IoQueue`](crate::IoQueue) worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub thread_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            thread_name: "iostore-queue".into(),
        }
    }
}

/// A container to mount at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Container base path (without `.toc`/`.cas`).
    pub path: PathBuf,
    #[serde(default)]
    pub priority: i32,
}

/// Top-level configuration, usually loaded from TOML:
///
/// ```toml
/// [dispatcher]
/// request_block_size = 512
///
/// [queue]
/// thread_name = "chunk-io"
///
/// [[mounts]]
/// path = "paks/patch"
/// priority = 10
///
/// [[mounts]]
/// path = "paks/base"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoStoreConfig {
    pub dispatcher: DispatcherConfig,
    pub queue: QueueConfig,
    pub mounts: Vec<MountConfig>,
}

impl IoStoreConfig {
    pub fn from_toml_str(s: &str) -> DispatchResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| DispatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> DispatchResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if self.dispatcher.request_block_size == 0 || self.dispatcher.batch_block_size == 0 {
            return Err(DispatchError::Config("block sizes must be non-zero".into()));
        }
        if self.queue.thread_name.is_empty() {
            return Err(DispatchError::Config("queue thread name is empty".into()));
        }
        Ok(())
    }

    /// Open and mount every configured container, relative paths resolved
    /// against `root`.
    ///
    /// Containers that fail to open are logged and skipped. Returns the
    /// number mounted.
    pub fn mount_all(&self, dispatcher: &Dispatcher, root: &Path) -> usize {
        let mut mounted = 0;
        for mount in &self.mounts {
            let path = root.join(&mount.path);
            match dispatcher.open_and_mount(&path, mount.priority) {
                Ok(_) => mounted += 1,
                Err(e) => warn!(container = ?path, error = %e, "skipping container"),
            }
        }
        mounted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IoStoreConfig::default();
        assert_eq!(config.dispatcher.request_block_size, 256);
        assert_eq!(config.dispatcher.batch_block_size, 32);
        assert_eq!(config.queue.thread_name, "iostore-queue");
        assert!(config.mounts.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_toml() {
        let config = IoStoreConfig::from_toml_str(
            r#"
            [dispatcher]
            request_block_size = 64

            [[mounts]]
            path = "patch"
            priority = 5

            [[mounts]]
            path = "base"
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatcher.request_block_size, 64);
        assert_eq!(config.dispatcher.batch_block_size, 32);
        assert_eq!(config.mounts.len(), 2);
        assert_eq!(config.mounts[0].priority, 5);
        assert_eq!(config.mounts[1].priority, 0);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(
            IoStoreConfig::from_toml_str("").unwrap(),
            IoStoreConfig::default()
        );
    }

    #[test]
    fn zero_block_size_rejected() {
        let err = IoStoreConfig::from_toml_str("[dispatcher]\nbatch_block_size = 0\n").unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = IoStoreConfig::from_toml_str("mounts = 3").unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn mount_all_skips_broken_containers() {
        use iostore_container::testutil::{chunk_id, write_chunks};

        let dir = tempfile::tempdir().unwrap();
        write_chunks(dir.path(), "good", &[(chunk_id(b"a"), "alpha")]);
        let config = IoStoreConfig {
            mounts: vec![
                MountConfig {
                    path: "missing".into(),
                    priority: 0,
                },
                MountConfig {
                    path: "good".into(),
                    priority: 0,
                },
            ],
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(&config.dispatcher);
        assert_eq!(config.mount_all(&dispatcher, dir.path()), 1);
        assert_eq!(dispatcher.registry().mounted_count(), 1);
    }
}
