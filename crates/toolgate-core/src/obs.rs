//! Lifecycle events for plans, sandbox runs and capability injection.
//!
//! All events go out at `info!` (drops at `warn!`) with an `event` field, so
//! a JSON subscriber yields one filterable record per lifecycle step.

use tracing::{info, warn};

/// RAII guard entering a plan-scoped span for the lifetime of a plan.
pub struct PlanSpan {
    _span: tracing::span::EnteredSpan,
}

impl PlanSpan {
    pub fn enter(plan_id: &str) -> Self {
        Self {
            _span: plan_span(plan_id).entered(),
        }
    }
}

/// The plan-scoped span, for attaching to futures with
/// [`tracing::Instrument`]. An entered [`PlanSpan`] must not be held across
/// an `.await`.
pub fn plan_span(plan_id: &str) -> tracing::Span {
    tracing::info_span!("toolgate.plan", plan_id = %plan_id)
}

pub fn emit_plan_started(plan_id: &str, task_count: usize, layer_count: usize) {
    info!(
        event = "plan.started",
        plan_id = %plan_id,
        task_count = task_count,
        layer_count = layer_count,
    );
}

pub fn emit_plan_finished(
    plan_id: &str,
    elapsed_ms: u64,
    succeeded: usize,
    failed: usize,
    speedup: f64,
) {
    info!(
        event = "plan.finished",
        plan_id = %plan_id,
        elapsed_ms = elapsed_ms,
        succeeded = succeeded,
        failed = failed,
        speedup = speedup,
    );
}

pub fn emit_sandbox_finished(duration_ms: u64, success: bool, trace_count: usize, cache_hit: bool) {
    info!(
        event = "sandbox.finished",
        duration_ms = duration_ms,
        success = success,
        trace_count = trace_count,
        cache_hit = cache_hit,
    );
}

/// A capability was rejected by the injector and will not be available.
pub fn emit_capability_dropped(capability_id: &str, name: &str, reason: &dyn std::fmt::Display) {
    warn!(
        event = "capability.dropped",
        capability_id = %capability_id,
        name = %name,
        reason = %reason,
    );
}
