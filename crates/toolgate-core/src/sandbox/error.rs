//! Error types for the sandbox bridge.

/// Failures that abort a whole sandbox run. Errors raised by user code or by
/// individual tool calls are not bridge errors; they come back inside the
/// [`SandboxOutcome`](super::SandboxOutcome).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("code is {size} bytes, above the {limit} byte limit")]
    CodeTooLarge { size: usize, limit: usize },

    #[error("sandbox did not finish within {timeout_ms}ms")]
    WorkerTimeout { timeout_ms: u64 },

    #[error("sandbox worker crashed: {reason}")]
    WorkerCrash { reason: String },

    #[error("failed to start sandbox worker: {0}")]
    Spawn(String),
}

/// Result type for sandbox operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

impl From<toolgate_isolate::IsolateError> for BridgeError {
    fn from(e: toolgate_isolate::IsolateError) -> Self {
        Self::Spawn(e.to_string())
    }
}
