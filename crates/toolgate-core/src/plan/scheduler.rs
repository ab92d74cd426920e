//! Layered topological scheduling.
//!
//! Each pass collects every unplaced task whose dependencies are all placed;
//! that set is one layer. A pass that places nothing while tasks remain means
//! the remainder contains a cycle.

use std::collections::HashSet;

use tracing::debug;

use super::error::{SchedulerError, SchedulerResult};
use super::task::{ExecutionPlan, Task};

/// Split `tasks` into dependency layers.
///
/// Within a layer tasks keep their submission order. Every task's `layer`
/// field is set to the index of the layer it lands in.
pub fn schedule(tasks: Vec<Task>) -> SchedulerResult<ExecutionPlan> {
    validate(&tasks)?;

    let mut remaining = tasks;
    let mut placed: HashSet<String> = HashSet::new();
    let mut layers: Vec<Vec<Task>> = Vec::new();

    while !remaining.is_empty() {
        let (mut ready, blocked): (Vec<Task>, Vec<Task>) = remaining
            .into_iter()
            .partition(|task| task.dependencies().iter().all(|dep| placed.contains(*dep)));

        if ready.is_empty() {
            return Err(SchedulerError::CycleDetected {
                tasks: blocked.into_iter().map(|task| task.id).collect(),
            });
        }

        let index = layers.len();
        for task in &mut ready {
            task.layer = index;
        }
        placed.extend(ready.iter().map(|task| task.id.clone()));
        debug!(layer = index, tasks = ready.len(), "layer scheduled");
        layers.push(ready);
        remaining = blocked;
    }

    Ok(ExecutionPlan { layers })
}

fn validate(tasks: &[Task]) -> SchedulerResult<()> {
    let mut ids: HashSet<&str> = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(SchedulerError::DuplicateTask {
                task: task.id.clone(),
            });
        }
    }
    for task in tasks {
        if let Some(missing) = task.dependencies().into_iter().find(|dep| !ids.contains(dep)) {
            return Err(SchedulerError::UnknownDependency {
                task: task.id.clone(),
                dependency: missing.to_string(),
            });
        }
    }
    Ok(())
}
