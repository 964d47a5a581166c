use iostore_container::ChunkBytes;
use iostore_types::{ChunkId, IoErrorCode, ReadOptions};

use crate::slab::SlotHandle;

pub type RequestHandle = SlotHandle<Request>;
pub type BatchHandle = SlotHandle<Batch>;

/// Outcome slot of a [`Request`].
///
/// Starts as `Unknown` and moves exactly once to `Ok` or `Failed` when the
/// owning batch is issued.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RequestResult {
    #[default]
    Unknown,
    Ok(ChunkBytes),
    Failed(IoErrorCode),
}

impl RequestResult {
    /// `true` once the request has left `Unknown`.
    pub fn is_ready(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn bytes(&self) -> Option<&ChunkBytes> {
        match self {
            Self::Ok(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<IoErrorCode> {
        match self {
            Self::Failed(code) => Some(*code),
            _ => None,
        }
    }
}

/// One chunk read.
#[derive(Clone, Debug)]
pub struct Request {
    pub chunk_id: ChunkId,
    pub options: ReadOptions,
    pub result: RequestResult,
    /// Opaque caller value, returned untouched with the result.
    pub user_data: u64,
}

impl Request {
    pub fn new(chunk_id: ChunkId, options: ReadOptions, user_data: u64) -> Self {
        Self {
            chunk_id,
            options,
            result: RequestResult::Unknown,
            user_data,
        }
    }
}

/// An ordered group of requests issued together.
#[derive(Debug, Default)]
pub struct Batch {
    pub(crate) requests: Vec<RequestHandle>,
    pub(crate) issued: bool,
}

impl Batch {
    pub(crate) fn with_requests(requests: Vec<RequestHandle>) -> Self {
        Self {
            requests,
            issued: false,
        }
    }

    pub fn requests(&self) -> &[RequestHandle] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn is_issued(&self) -> bool {
        self.issued
    }
}

/// A finished request copied out of the allocator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedRequest {
    pub chunk_id: ChunkId,
    pub result: RequestResult,
    pub user_data: u64,
}

impl From<Request> for CompletedRequest {
    fn from(request: Request) -> Self {
        Self {
            chunk_id: request.chunk_id,
            result: request.result,
            user_data: request.user_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_is_unknown() {
        let request = Request::new(ChunkId::from_content(b"x"), ReadOptions::default(), 7);
        assert_eq!(request.result, RequestResult::Unknown);
        assert!(!request.result.is_ready());
    }

    #[test]
    fn failed_result_is_ready() {
        let result = RequestResult::Failed(IoErrorCode::NotFound);
        assert!(result.is_ready());
        assert!(!result.is_ok());
        assert_eq!(result.error(), Some(IoErrorCode::NotFound));
        assert!(result.bytes().is_none());
    }

    #[test]
    fn completed_request_keeps_fields() {
        let id = ChunkId::from_content(b"y");
        let mut request = Request::new(id, ReadOptions::new(2, 4), 42);
        request.result = RequestResult::Failed(IoErrorCode::InvalidChunkId);
        let done = CompletedRequest::from(request);
        assert_eq!(done.chunk_id, id);
        assert_eq!(done.user_data, 42);
        assert_eq!(done.result.error(), Some(IoErrorCode::InvalidChunkId));
    }
}
