//! Layer-by-layer parallel plan execution.
//!
//! Layers run strictly in order. Every task in a layer is spawned at once and
//! the layer completes only when all of them have reported, so one failure
//! never cancels a sibling. Failures surface to dependents as
//! [`TaskError::DependencyFailed`] when their arguments are resolved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn, Instrument};

use super::error::{SchedulerResult, TaskError, TaskFailure};
use super::scheduler::schedule;
use super::task::{ArgValue, ExecutionPlan, Task, TaskKind, TaskResult};
use crate::config::ExecutorConfig;
use crate::metrics::METRICS;
use crate::obs;
use crate::sandbox::{CodeRunner, SandboxRequest};
use crate::tools::ToolClient;

/// Aggregate outcome of a plan. Always partial-success shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub plan_id: String,
    /// Every task's result, in layer order.
    pub results: Vec<TaskResult>,
    /// The failed subset of `results`.
    pub errors: Vec<TaskFailure>,
    pub elapsed_ms: u64,
    pub layer_count: usize,
    /// Sum of task durations over wall time.
    pub speedup: f64,
}

impl PlanOutcome {
    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.task_id == task_id)
    }

    pub fn succeeded(&self) -> usize {
        self.results.len() - self.errors.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

type Outputs = HashMap<String, Result<Value, String>>;

/// Runs scheduled plans against a tool client and, for code tasks, a
/// sandbox.
#[derive(Clone)]
pub struct PlanExecutor {
    tools: Arc<dyn ToolClient>,
    code_runner: Option<Arc<dyn CodeRunner>>,
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(tools: Arc<dyn ToolClient>, config: ExecutorConfig) -> Self {
        Self {
            tools,
            code_runner: None,
            config,
        }
    }

    pub fn with_code_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.code_runner = Some(runner);
        self
    }

    /// Schedule `tasks` and execute the resulting plan.
    pub async fn execute(&self, tasks: Vec<Task>) -> SchedulerResult<PlanOutcome> {
        let plan_id = uuid::Uuid::new_v4().to_string();
        let plan = {
            let _span = obs::PlanSpan::enter(&plan_id);
            let task_count = tasks.len();
            let plan = schedule(tasks)?;
            obs::emit_plan_started(&plan_id, task_count, plan.layer_count());
            plan
        };
        Ok(self
            .execute_plan(plan_id.clone(), plan)
            .instrument(obs::plan_span(&plan_id))
            .await)
    }

    /// Execute an already scheduled plan.
    #[instrument(skip(self, plan), fields(layers = plan.layer_count(), tasks = plan.task_count()))]
    pub async fn execute_plan(&self, plan_id: String, plan: ExecutionPlan) -> PlanOutcome {
        let start = Instant::now();
        let layer_count = plan.layer_count();
        let mut outputs: Outputs = HashMap::new();
        let mut results: Vec<TaskResult> = Vec::with_capacity(plan.task_count());

        for (index, layer) in plan.layers.into_iter().enumerate() {
            let handles: Vec<_> = layer
                .into_iter()
                .map(|task| {
                    let prepared = self.prepare(&task, &outputs);
                    let this = self.clone();
                    let task_id = task.id.clone();
                    let layer = task.layer;
                    let handle = tokio::spawn(async move { this.run_task(task, prepared).await });
                    (task_id, layer, handle)
                })
                .collect();

            let joined = futures::future::join_all(
                handles
                    .into_iter()
                    .map(|(task_id, layer, handle)| async move { (task_id, layer, handle.await) }),
            )
            .await;

            for (task_id, layer, joined) in joined {
                let result = joined.unwrap_or_else(|e| {
                    warn!(task_id = %task_id, error = %e, "task panicked");
                    TaskResult {
                        task_id: task_id.clone(),
                        status: super::task::TaskStatus::Error,
                        output: None,
                        error: Some(format!("task aborted: {e}")),
                        duration_ms: 0,
                        layer,
                    }
                });
                let entry = match (&result.output, &result.error) {
                    (Some(output), None) => Ok(output.clone()),
                    (_, error) => Err(error.clone().unwrap_or_else(|| "no output".to_string())),
                };
                outputs.insert(task_id, entry);
                results.push(result);
            }
            debug!(layer = index, "layer complete");
        }

        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let busy_ms: u64 = results.iter().map(|r| r.duration_ms).sum();
        let speedup = if elapsed.as_secs_f64() > 0.0 {
            (busy_ms as f64 / 1000.0) / elapsed.as_secs_f64()
        } else {
            1.0
        };

        let errors: Vec<TaskFailure> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| TaskFailure {
                task_id: r.task_id.clone(),
                layer: r.layer,
                error: r.error.clone().unwrap_or_default(),
            })
            .collect();

        METRICS.inc_plans_executed();
        METRICS.add_tasks_failed(errors.len() as u64);
        obs::emit_plan_finished(
            &plan_id,
            elapsed_ms,
            results.len() - errors.len(),
            errors.len(),
            speedup,
        );

        PlanOutcome {
            plan_id,
            results,
            errors,
            elapsed_ms,
            layer_count,
            speedup,
        }
    }

    /// Resolve arguments against outputs of earlier layers.
    fn prepare(&self, task: &Task, outputs: &Outputs) -> Result<Map<String, Value>, TaskError> {
        for dep in &task.depends_on {
            lookup(outputs, dep)?;
        }
        let mut args = Map::new();
        for (name, value) in &task.args {
            let resolved = match value {
                ArgValue::Literal { value } => value.clone(),
                ArgValue::Reference { task: dep, path } => {
                    let output = lookup(outputs, dep)?;
                    select_path(output, path)
                        .cloned()
                        .ok_or_else(|| TaskError::DependencyFailed {
                            dependency: dep.clone(),
                            reason: format!("output has no value at path {}", path.join(".")),
                        })?
                }
            };
            args.insert(name.clone(), resolved);
        }
        if matches!(task.kind, TaskKind::CodeExecution { .. }) {
            let mut deps = Map::new();
            for dep in task.dependencies() {
                deps.insert(dep.to_string(), lookup(outputs, dep)?.clone());
            }
            args.insert("deps".to_string(), Value::Object(deps));
        }
        Ok(args)
    }

    async fn run_task(&self, task: Task, prepared: Result<Map<String, Value>, TaskError>) -> TaskResult {
        let start = Instant::now();
        let outcome = match prepared {
            Ok(args) => {
                let timeout_ms = task.timeout_ms.unwrap_or(self.config.task_timeout_ms);
                match tokio::time::timeout(Duration::from_millis(timeout_ms), self.invoke(&task, args))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TaskError::TaskTimeout { timeout_ms }),
                }
            }
            Err(e) => Err(e),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                debug!(task_id = %task.id, duration_ms, "task succeeded");
                TaskResult::success(&task, output, duration_ms)
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "task failed");
                TaskResult::failure(&task, &e, duration_ms)
            }
        }
    }

    async fn invoke(&self, task: &Task, args: Map<String, Value>) -> Result<Value, TaskError> {
        match &task.kind {
            TaskKind::Tool { server, tool } => Ok(self
                .tools
                .call_tool(server, tool, Value::Object(args))
                .await?),
            TaskKind::CodeExecution {
                code,
                capability_source,
            } => {
                let runner = self
                    .code_runner
                    .as_ref()
                    .ok_or(TaskError::SandboxUnavailable)?;
                let request = SandboxRequest {
                    code: code.clone(),
                    tool_definitions: self.tools.definitions(),
                    capability_source: capability_source.clone(),
                    context: Some(Value::Object(args)),
                };
                let outcome = runner.run_code(request).await?;
                if outcome.success {
                    Ok(outcome.result.unwrap_or(Value::Null))
                } else {
                    Err(TaskError::CodeFailed(
                        outcome.error.unwrap_or_else(|| "unknown error".to_string()),
                    ))
                }
            }
        }
    }
}

fn lookup<'a>(outputs: &'a Outputs, dep: &str) -> Result<&'a Value, TaskError> {
    match outputs.get(dep) {
        Some(Ok(value)) => Ok(value),
        Some(Err(reason)) => Err(TaskError::DependencyFailed {
            dependency: dep.to_string(),
            reason: reason.clone(),
        }),
        None => Err(TaskError::DependencyFailed {
            dependency: dep.to_string(),
            reason: "produced no result".to_string(),
        }),
    }
}

/// Walk `path` through objects (by key) and arrays (by index).
pub(crate) fn select_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_path() {
        let v = json!({"items": [{"id": 7}, {"id": 8}], "n": 1});
        let path = |p: &str| p.split('.').map(str::to_string).collect::<Vec<_>>();
        assert_eq!(select_path(&v, &path("items.1.id")), Some(&json!(8)));
        assert_eq!(select_path(&v, &[]), Some(&v));
        assert_eq!(select_path(&v, &path("n.x")), None);
        assert_eq!(select_path(&v, &path("items.9")), None);
    }

    #[test]
    fn test_lookup_reports_failed_dependency() {
        let mut outputs: Outputs = HashMap::new();
        outputs.insert("a".into(), Err("boom".into()));
        let err = lookup(&outputs, "a").unwrap_err();
        assert_eq!(
            err,
            TaskError::DependencyFailed {
                dependency: "a".into(),
                reason: "boom".into()
            }
        );
        assert!(lookup(&outputs, "b").is_err());
    }
}
