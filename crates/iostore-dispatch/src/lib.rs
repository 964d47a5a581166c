//! IoStore dispatch layer.
//!
//! Turns chunk ids into bytes from the mounted containers, either
//! synchronously through a [`Dispatcher`] batch or asynchronously through an
//! [`IoQueue`] worker thread.
//!
//! # Architecture
//!
//! - [`slab`]: generational block allocator backing requests and batches
//! - [`request`]: `Request`/`Batch` model and request results
//! - [`Dispatcher`]: owns the mount registry and both allocators; creates,
//!   issues and frees batches
//! - [`IoQueue`]: queued → pending → completed pipeline on one worker
//! - [`config`]: TOML-loadable configuration and startup mounts
//!
//! # Example
//!
//! ```no_run
//! use iostore_dispatch::{Dispatcher, DispatcherConfig};
//! use iostore_types::{ChunkId, ReadOptions};
//!
//! let dispatcher = Dispatcher::new(&DispatcherConfig::default());
//! dispatcher.open_and_mount("paks/base", 0)?;
//!
//! let batch = dispatcher.new_batch();
//! let request = dispatcher.read(batch, ChunkId::from_content(b"hello"), ReadOptions::whole(), 0)?;
//! dispatcher.issue_batch(batch)?;
//! println!("{:?}", dispatcher.request_result(request)?);
//! dispatcher.free_batch(batch)?;
//! # Ok::<(), iostore_dispatch::DispatchError>(())
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod request;
pub mod slab;

pub use config::{DispatcherConfig, IoStoreConfig, MountConfig, QueueConfig};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchResult};
pub use queue::{BatchCompletion, BatchReadyCallback, IoQueue};
pub use request::{Batch, BatchHandle, CompletedRequest, Request, RequestHandle, RequestResult};
pub use slab::{AllocatorStats, BlockAllocator, SlotHandle};
