use iostore_container::ContainerError;

/// Errors from dispatcher, queue and configuration operations.
///
/// Per-request lookup failures are not errors at this level; they are
/// recorded on the request's result.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The handle refers to a freed or never-allocated slot.
    #[error("stale {kind} handle")]
    StaleHandle { kind: &'static str },

    /// Requests can no longer be added to, or re-issued from, this batch.
    #[error("batch has already been issued")]
    BatchAlreadyIssued,

    /// The queue worker has been stopped.
    #[error("queue worker is stopped")]
    QueueStopped,

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    pub(crate) fn stale_request() -> Self {
        Self::StaleHandle { kind: "request" }
    }

    pub(crate) fn stale_batch() -> Self {
        Self::StaleHandle { kind: "batch" }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
