//! Trusted side of the isolation boundary.
//!
//! [`SandboxBridge`] runs one isolate per request and serves its tool calls.
//! [`SandboxPipeline`] puts the [`ExecutionCache`](crate::cache::ExecutionCache)
//! in front of the bridge and is what plans and the gateway use.

pub mod bridge;
pub mod error;
pub mod pipeline;
pub mod traces;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use toolgate_protocol::{ToolDefinition, TraceEvent};

pub use bridge::SandboxBridge;
pub use error::{BridgeError, BridgeResult};
pub use pipeline::SandboxPipeline;
pub use traces::{summarize, TraceStats, TraceSummary};

/// One code-execution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub code: String,
    /// Tools exposed on the `tools` surface.
    #[serde(default)]
    pub tool_definitions: Vec<ToolDefinition>,
    /// Compiled bundle from the capability injector.
    #[serde(default)]
    pub capability_source: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

impl SandboxRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            tool_definitions: Vec::new(),
            capability_source: None,
            context: None,
        }
    }

    pub fn with_tools(mut self, tool_definitions: Vec<ToolDefinition>) -> Self {
        self.tool_definitions = tool_definitions;
        self
    }

    pub fn with_capability_source(mut self, source: impl Into<String>) -> Self {
        self.capability_source = Some(source.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Result of one sandbox run. `success == false` means user code threw or
/// rejected; infrastructure failures are [`BridgeError`]s instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Tool and capability events merged by timestamp.
    pub traces: Vec<TraceEvent>,
    pub duration_ms: u64,
    pub cache_hit: bool,
}

/// Something that can execute code requests; the plan executor's seam to the
/// sandbox.
#[async_trait]
pub trait CodeRunner: Send + Sync + 'static {
    async fn run_code(&self, request: SandboxRequest) -> BridgeResult<SandboxOutcome>;
}
