//! Error types for the isolate crate.

/// Errors produced while starting or driving an isolate.
#[derive(Debug, thiserror::Error)]
pub enum IsolateError {
    #[error("failed to spawn isolate thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("isolate runtime setup failed: {0}")]
    Setup(#[source] anyhow::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("bootstrap script failed: {0}")]
    Bootstrap(String),

    #[error("isolate event loop failed: {0}")]
    EventLoop(String),

    #[error("isolate terminated")]
    Terminated,

    #[error("isolate exceeded its heap limit of {limit_bytes} bytes")]
    HeapLimitExceeded { limit_bytes: usize },
}

/// Result type for isolate operations.
pub type IsolateResult<T> = std::result::Result<T, IsolateError>;
