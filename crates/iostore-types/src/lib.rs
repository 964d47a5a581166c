//! Foundation types for IoStore.
//!
//! Every other IoStore crate depends on `iostore-types`.
//!
//! # Key Types
//!
//! - [`ChunkId`]: Content-addressed chunk identifier with an invalid sentinel
//! - [`ReadOptions`]: Offset/size window applied when a chunk is resolved
//! - [`IoErrorCode`]: Status codes carried by failed requests

pub mod chunk_id;
pub mod error;
pub mod options;
pub mod status;

pub use chunk_id::{ChunkId, CHUNK_ID_SIZE};
pub use error::TypeError;
pub use options::ReadOptions;
pub use status::IoErrorCode;
