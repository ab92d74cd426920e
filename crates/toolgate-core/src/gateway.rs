//! The public facade: one object wiring the scheduler, executor, sandbox
//! pipeline, cache and capability injector over a single [`ToolClient`].

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use toolgate_protocol::ToolDefinition;

use crate::cache::{CacheStats, ExecutionCache};
use crate::capability::{
    Capability, CapabilityBundle, CapabilityInjector, CapabilityStore, PermissionInferrer,
    StoreResult,
};
use crate::config::{ConfigResult, GatewayConfig};
use crate::metrics::METRICS;
use crate::plan::{PlanExecutor, PlanOutcome, SchedulerResult, Task};
use crate::sandbox::{BridgeResult, SandboxBridge, SandboxOutcome, SandboxPipeline, SandboxRequest};
use crate::tools::ToolClient;

/// Execution core entry point.
#[derive(Clone)]
pub struct Gateway {
    tools: Arc<dyn ToolClient>,
    pipeline: SandboxPipeline,
    cache: Arc<ExecutionCache>,
    executor: PlanExecutor,
    injector: CapabilityInjector,
    config: GatewayConfig,
}

impl Gateway {
    /// Validate `config` and build every component.
    pub fn new(tools: Arc<dyn ToolClient>, config: GatewayConfig) -> ConfigResult<Self> {
        config.validate()?;

        let cache = Arc::new(ExecutionCache::new(config.cache.clone()));
        let bridge = Arc::new(SandboxBridge::new(tools.clone(), config.sandbox.clone()));
        let pipeline = SandboxPipeline::new(bridge, cache.clone());
        let executor = PlanExecutor::new(tools.clone(), config.executor.clone())
            .with_code_runner(Arc::new(pipeline.clone()));

        info!(
            cache_enabled = config.cache.enabled,
            sandbox_timeout_ms = config.sandbox.timeout_ms,
            max_concurrent = config.sandbox.max_concurrent,
            "gateway ready"
        );

        Ok(Self {
            tools,
            pipeline,
            cache,
            executor,
            injector: CapabilityInjector::new(),
            config,
        })
    }

    /// Attach a permission-set labeller to the capability injector.
    pub fn with_permission_inferrer(mut self, inferrer: Arc<dyn PermissionInferrer>) -> Self {
        self.injector = self.injector.with_inferrer(inferrer);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<dyn ToolClient> {
        &self.tools
    }

    /// Schedule and run a task graph. Only scheduling failures are errors;
    /// task failures are reported inside the outcome.
    pub async fn execute_plan(&self, tasks: Vec<Task>) -> SchedulerResult<PlanOutcome> {
        let outcome = self.executor.execute(tasks).await?;
        METRICS.flush();
        Ok(outcome)
    }

    /// Run `code` in a fresh isolate with `tool_definitions` exposed.
    pub async fn execute_in_sandbox(
        &self,
        code: impl Into<String>,
        tool_definitions: Vec<ToolDefinition>,
        capability_source: Option<String>,
        context: Option<Value>,
    ) -> BridgeResult<SandboxOutcome> {
        self.pipeline
            .run(SandboxRequest {
                code: code.into(),
                tool_definitions,
                capability_source,
                context,
            })
            .await
    }

    /// Compile capabilities into a source blob for
    /// [`execute_in_sandbox`](Self::execute_in_sandbox).
    pub fn compile_capabilities(&self, capabilities: &[Capability]) -> CapabilityBundle {
        self.injector.compile(capabilities)
    }

    /// Fetch capabilities by id from `store` and compile them.
    pub async fn compile_capabilities_from_store(
        &self,
        store: &dyn CapabilityStore,
        ids: &[String],
    ) -> StoreResult<CapabilityBundle> {
        self.injector.compile_from_store(store, ids).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop cached results whose key references `tool`. Call after a tool's
    /// definition changes.
    pub fn invalidate_tool(&self, tool: &str) -> usize {
        let removed = self.cache.invalidate(tool);
        info!(tool = %tool, removed, "tool invalidated");
        removed
    }
}
