//! Toolgate Core
//!
//! Execution core of a tool-call gateway for AI agents.
//!
//! ## Key Components
//!
//! - [`plan`]: layered topological scheduling and parallel execution of task
//!   graphs, with per-task failure isolation.
//! - [`sandbox`]: the trusted bridge to a per-request V8 isolate. Tool calls
//!   cross the boundary as typed [`RpcMessage`]s and are traced.
//! - [`capability`]: sanitization and injection of learned code fragments
//!   behind a depth-limited dispatcher.
//! - [`cache`]: LRU + TTL memoization of whole sandbox runs, keyed on code,
//!   context and the versions of the tools the code references.
//! - [`Gateway`]: the facade wiring all of the above over one [`ToolClient`].

pub mod cache;
pub mod capability;
pub mod config;
pub mod fakes;
pub mod gateway;
pub mod metrics;
pub mod obs;
pub mod plan;
pub mod sandbox;
pub mod telemetry;
pub mod tools;

pub use cache::{generate_cache_key, CacheKey, CacheStats, ExecutionCache};
pub use capability::{
    Capability, CapabilityBundle, CapabilityInjector, CapabilityStore, PermissionInferrer,
    SanitizationError,
};
pub use config::{CacheConfig, ConfigError, ExecutorConfig, GatewayConfig, SandboxConfig};
pub use gateway::Gateway;
pub use plan::{
    schedule, ArgValue, ExecutionPlan, PlanExecutor, PlanOutcome, SchedulerError, Task, TaskError,
    TaskKind, TaskResult, TaskStatus,
};
pub use sandbox::{
    summarize, BridgeError, CodeRunner, SandboxBridge, SandboxOutcome, SandboxPipeline,
    SandboxRequest, TraceSummary,
};
pub use tools::{ToolCallError, ToolClient, ToolRegistry};

pub use toolgate_protocol::{RpcMessage, ToolDefinition, TraceEvent};
