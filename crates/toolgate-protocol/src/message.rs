//! The message protocol between the host bridge and the isolate.
//!
//! Host → isolate: `init`, `rpc_result`.
//! Isolate → host: `rpc_call`, `capability_trace`, `execution_complete`.
//!
//! `rpc_call` and `rpc_result` are correlated by the `id` generated inside the
//! isolate; each id is answered exactly once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolDefinition;
use crate::trace::TraceEvent;
use crate::DEFAULT_MAX_CAPABILITY_DEPTH;

/// Everything an isolate receives before running user code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Body of the user's async function.
    pub code: String,
    #[serde(default)]
    pub tool_definitions: Vec<ToolDefinition>,
    /// Compiled capability bundle produced by the injector on the host.
    #[serde(default)]
    pub capability_source: Option<String>,
    /// Plain-value context exposed to user code as `context`.
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default = "default_depth")]
    pub max_capability_depth: u32,
}

fn default_depth() -> u32 {
    DEFAULT_MAX_CAPABILITY_DEPTH
}

impl InitPayload {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            tool_definitions: Vec::new(),
            capability_source: None,
            context: None,
            max_capability_depth: DEFAULT_MAX_CAPABILITY_DEPTH,
        }
    }
}

/// A single message crossing the isolation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcMessage {
    Init(InitPayload),
    RpcCall {
        id: String,
        server: String,
        tool: String,
        #[serde(default)]
        args: Value,
    },
    RpcResult {
        id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A capability event streamed out while user code is still running.
    CapabilityTrace { event: TraceEvent },
    ExecutionComplete {
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl RpcMessage {
    /// Successful reply to the call identified by `id`.
    pub fn reply_ok(id: impl Into<String>, result: Value) -> Self {
        Self::RpcResult {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed reply to the call identified by `id`.
    pub fn reply_err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::RpcResult {
            id: id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// The wire discriminant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::RpcCall { .. } => "rpc_call",
            Self::RpcResult { .. } => "rpc_result",
            Self::CapabilityTrace { .. } => "capability_trace",
            Self::ExecutionComplete { .. } => "execution_complete",
        }
    }
}
