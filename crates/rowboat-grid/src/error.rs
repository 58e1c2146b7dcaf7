use thiserror::Error;

pub type GridResult<T> = Result<T, GridError>;

#[derive(Debug, Error)]
pub enum GridError {
    /// The invocation was cancelled and its sinks were poisoned so that
    /// stale output cannot leak into a later invocation.
    #[error("output capture aborted")]
    Aborted,
    /// The invocation does not accept output on this stream.
    #[error("output is disabled for this invocation")]
    OutputDisabled,
    #[error("output stream is closed")]
    StreamClosed,
    #[error("type conversion failed: {0}")]
    TypeConversion(String),
    /// A capture invariant was violated. Always a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GridError {
    pub fn internal(message: impl Into<String>) -> Self {
        GridError::Internal(message.into())
    }
}
