//! Error types for planning and plan execution.

use crate::sandbox::BridgeError;
use crate::tools::ToolCallError;

/// Whole-plan failures. No task runs when scheduling fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("dependency cycle detected among tasks: {}", tasks.join(", "))]
    CycleDetected { tasks: Vec<String> },

    #[error("duplicate task id: {task}")]
    DuplicateTask { task: String },

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },
}

/// Result type for scheduling.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Failure of a single task. Never escapes its layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("dependency {dependency} failed: {reason}")]
    DependencyFailed { dependency: String, reason: String },

    #[error("task timed out after {timeout_ms}ms")]
    TaskTimeout { timeout_ms: u64 },

    #[error(transparent)]
    Tool(#[from] ToolCallError),

    #[error(transparent)]
    Sandbox(#[from] BridgeError),

    #[error("code execution failed: {0}")]
    CodeFailed(String),

    #[error("no sandbox is configured for code execution")]
    SandboxUnavailable,
}

/// A failed task, as reported in [`PlanOutcome::errors`](super::PlanOutcome).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub layer: usize,
    pub error: String,
}
