//! Task graph model: tasks, argument references and per-task results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::TaskError;

/// One argument value: a literal, or a reference into another task's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgValue {
    Literal {
        value: Value,
    },
    /// Output of `task`, optionally narrowed by a property path. Numeric path
    /// segments index into arrays.
    Reference {
        task: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        path: Vec<String>,
    },
}

impl ArgValue {
    pub fn literal(value: Value) -> Self {
        Self::Literal { value }
    }

    pub fn reference(task: impl Into<String>) -> Self {
        Self::Reference {
            task: task.into(),
            path: Vec::new(),
        }
    }

    /// Reference a dotted path (`"items.0.id"`) inside a task's output.
    pub fn reference_path(task: impl Into<String>, path: &str) -> Self {
        Self::Reference {
            task: task.into(),
            path: path
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Id of the referenced task, if any.
    pub fn referenced_task(&self) -> Option<&str> {
        match self {
            Self::Literal { .. } => None,
            Self::Reference { task, .. } => Some(task),
        }
    }
}

/// What a task does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Call `server:tool` through the trusted tool client.
    Tool { server: String, tool: String },
    /// Run inline code in the sandbox. The resolved arguments become its
    /// `context`, with dependency outputs under `context.deps`.
    CodeExecution {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capability_source: Option<String>,
    },
}

/// A node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub args: BTreeMap<String, ArgValue>,
    /// Explicit dependencies, in addition to those implied by references.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the executor's default timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Assigned by the scheduler.
    #[serde(default)]
    pub layer: usize,
}

impl Task {
    pub fn tool(id: impl Into<String>, server: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            TaskKind::Tool {
                server: server.into(),
                tool: tool.into(),
            },
        )
    }

    pub fn code(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            TaskKind::CodeExecution {
                code: code.into(),
                capability_source: None,
            },
        )
    }

    fn with_kind(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            args: BTreeMap::new(),
            depends_on: Vec::new(),
            timeout_ms: None,
            layer: 0,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    pub fn with_literal(self, name: impl Into<String>, value: Value) -> Self {
        self.with_arg(name, ArgValue::literal(value))
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_capability_source(mut self, source: impl Into<String>) -> Self {
        if let TaskKind::CodeExecution {
            capability_source, ..
        } = &mut self.kind
        {
            *capability_source = Some(source.into());
        }
        self
    }

    /// Declared and reference-implied dependencies, first-seen order, no
    /// duplicates.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        let declared = self.depends_on.iter().map(String::as_str);
        let referenced = self.args.values().filter_map(ArgValue::referenced_task);
        for dep in declared.chain(referenced) {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        deps
    }
}

/// Final status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
}

/// Outcome of one task. Written exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub layer: usize,
}

impl TaskResult {
    pub(crate) fn success(task: &Task, output: Value, duration_ms: u64) -> Self {
        Self {
            task_id: task.id.clone(),
            status: TaskStatus::Success,
            output: Some(output),
            error: None,
            duration_ms,
            layer: task.layer,
        }
    }

    pub(crate) fn failure(task: &Task, error: &TaskError, duration_ms: u64) -> Self {
        Self {
            task_id: task.id.clone(),
            status: TaskStatus::Error,
            output: None,
            error: Some(error.to_string()),
            duration_ms,
            layer: task.layer,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Layered plan produced by the scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    pub layers: Vec<Vec<Task>>,
}

impl ExecutionPlan {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn task_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer index of `task_id`, if planned.
    pub fn layer_of(&self, task_id: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|task| task.id == task_id))
    }
}
