//! Trusted tool invocation.
//!
//! [`ToolClient`] is the seam to the backend tool providers. Both plan tasks
//! and sandbox RPC calls go through it.

mod registry;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use toolgate_protocol::ToolDefinition;

pub use registry::{ToolHandler, ToolRegistry};

/// Tool invocation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("tool not found: {server}:{tool}")]
    ToolNotFound { server: String, tool: String },

    #[error("tool {server}:{tool} is already registered")]
    DuplicateTool { server: String, tool: String },

    #[error("tool {server}:{tool} failed: {message}")]
    Failed {
        server: String,
        tool: String,
        message: String,
    },

    #[error("tool call limit of {limit} per run reached")]
    CallLimitExceeded { limit: usize },
}

impl ToolCallError {
    pub fn failed(server: &str, tool: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            server: server.to_string(),
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(server: &str, tool: &str) -> Self {
        Self::ToolNotFound {
            server: server.to_string(),
            tool: tool.to_string(),
        }
    }
}

/// Result type for tool invocation.
pub type ToolCallResult<T> = std::result::Result<T, ToolCallError>;

/// Registry of callable tools, keyed by server id and tool name.
#[async_trait]
pub trait ToolClient: Send + Sync + 'static {
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> ToolCallResult<Value>;

    /// Serializable descriptions of every tool this client can call.
    fn definitions(&self) -> Vec<ToolDefinition>;
}
