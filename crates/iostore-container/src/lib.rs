//! IoStore container format.
//!
//! A container is a pair of files sharing a base path:
//!
//! - **TOC** (`.toc`): fixed header plus one fixed-size entry per chunk,
//!   mapping each [`ChunkId`](iostore_types::ChunkId) to an `(offset, length)`
//!   range in the data file
//! - **Data** (`.cas`): the chunk bytes, back to back
//!
//! # Architecture
//!
//! - [`toc`]: header/entry codec and validation
//! - [`ContainerReader`]: opens and validates a container, memory-maps its
//!   data and serves zero-copy [`ChunkBytes`] views
//! - [`StoreRegistry`]: the mounted containers, searched in precedence order

pub mod chunk;
pub mod error;
pub mod reader;
pub mod registry;
pub mod toc;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use chunk::ChunkBytes;
pub use error::{ContainerError, ContainerResult, TocFormatError};
pub use reader::{container_file, ContainerReader, DATA_EXTENSION, TOC_EXTENSION};
pub use registry::{MountSnapshot, StoreRegistry};
pub use toc::{Toc, TocEntry, TocHeader, TOC_ENTRY_SIZE, TOC_HEADER_SIZE, TOC_MAGIC};
