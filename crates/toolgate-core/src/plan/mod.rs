//! Task graphs: layered scheduling and parallel execution.

pub mod error;
pub mod executor;
pub mod scheduler;
pub mod task;

pub use error::{SchedulerError, SchedulerResult, TaskError, TaskFailure};
pub use executor::{PlanExecutor, PlanOutcome};
pub use scheduler::schedule;
pub use task::{ArgValue, ExecutionPlan, Task, TaskKind, TaskResult, TaskStatus};
