use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::bridge::SandboxBridge;
use super::error::BridgeResult;
use super::{CodeRunner, SandboxOutcome, SandboxRequest};
use crate::cache::{generate_cache_key, ExecutionCache};
use crate::obs;

/// Cache in front of the bridge. Hits never touch an isolate.
#[derive(Clone)]
pub struct SandboxPipeline {
    bridge: Arc<SandboxBridge>,
    cache: Arc<ExecutionCache>,
}

impl SandboxPipeline {
    pub fn new(bridge: Arc<SandboxBridge>, cache: Arc<ExecutionCache>) -> Self {
        Self { bridge, cache }
    }

    pub fn cache(&self) -> &ExecutionCache {
        &self.cache
    }

    #[instrument(skip_all)]
    pub async fn run(&self, request: SandboxRequest) -> BridgeResult<SandboxOutcome> {
        let key = self.cache.is_enabled().then(|| {
            generate_cache_key(
                &request.code,
                request.context.as_ref(),
                request.capability_source.as_deref(),
                &request.tool_definitions,
            )
        });

        if let Some(mut hit) = key.as_ref().and_then(|key| self.cache.get(key)) {
            hit.cache_hit = true;
            obs::emit_sandbox_finished(hit.duration_ms, hit.success, hit.traces.len(), true);
            return Ok(hit);
        }

        let outcome = self.bridge.run(request).await?;
        if let Some(key) = key {
            self.cache.set(key, &outcome);
        }
        obs::emit_sandbox_finished(
            outcome.duration_ms,
            outcome.success,
            outcome.traces.len(),
            false,
        );
        Ok(outcome)
    }
}

#[async_trait]
impl CodeRunner for SandboxPipeline {
    async fn run_code(&self, request: SandboxRequest) -> BridgeResult<SandboxOutcome> {
        self.run(request).await
    }
}
