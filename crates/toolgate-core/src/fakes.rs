//! In-memory fakes for the external collaborators (testing only)
//!
//! Provides `StaticToolClient` and `MemoryCapabilityStore`, which satisfy the
//! [`ToolClient`] and [`CapabilityStore`] contracts without any backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use toolgate_protocol::ToolDefinition;

use crate::capability::{Capability, CapabilityStore, StoreResult};
use crate::tools::{ToolCallError, ToolCallResult, ToolClient};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// StaticToolClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CannedTool {
    definition: ToolDefinition,
    response: Result<Value, String>,
    delay: Duration,
}

/// A call observed by [`StaticToolClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub server: String,
    pub tool: String,
    pub args: Value,
}

/// Tool client answering every tool with a fixed response after an optional
/// delay, recording each call.
#[derive(Debug, Default)]
pub struct StaticToolClient {
    tools: Mutex<BTreeMap<(String, String), CannedTool>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl StaticToolClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool that succeeds with `response`.
    pub fn with_tool(self, server: &str, tool: &str, response: Value) -> Self {
        self.insert(server, tool, Ok(response), Duration::ZERO);
        self
    }

    /// Add a tool that succeeds with `response` after `delay`.
    pub fn with_slow_tool(self, server: &str, tool: &str, response: Value, delay: Duration) -> Self {
        self.insert(server, tool, Ok(response), delay);
        self
    }

    /// Add a tool whose handler always fails with `message`.
    pub fn with_failing_tool(self, server: &str, tool: &str, message: &str) -> Self {
        self.insert(server, tool, Err(message.to_string()), Duration::ZERO);
        self
    }

    fn insert(&self, server: &str, tool: &str, response: Result<Value, String>, delay: Duration) {
        lock(&self.tools).insert(
            (server.to_string(), tool.to_string()),
            CannedTool {
                definition: ToolDefinition::new(server, tool),
                response,
                delay,
            },
        );
    }

    /// Replace a tool's definition, e.g. to simulate a version bump.
    pub fn set_definition(&self, definition: ToolDefinition) {
        let key = (definition.server_id.clone(), definition.name.clone());
        if let Some(canned) = lock(&self.tools).get_mut(&key) {
            canned.definition = definition;
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, server: &str, tool: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.server == server && call.tool == tool)
            .count()
    }
}

#[async_trait]
impl ToolClient for StaticToolClient {
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> ToolCallResult<Value> {
        lock(&self.calls).push(RecordedCall {
            server: server.to_string(),
            tool: tool.to_string(),
            args,
        });
        let canned = lock(&self.tools)
            .get(&(server.to_string(), tool.to_string()))
            .cloned()
            .ok_or_else(|| ToolCallError::not_found(server, tool))?;
        if !canned.delay.is_zero() {
            tokio::time::sleep(canned.delay).await;
        }
        canned
            .response
            .map_err(|message| ToolCallError::failed(server, tool, message))
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        lock(&self.tools)
            .values()
            .map(|canned| canned.definition.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MemoryCapabilityStore
// ---------------------------------------------------------------------------

/// In-memory capability store backed by a `BTreeMap<id, Capability>`.
#[derive(Debug, Default)]
pub struct MemoryCapabilityStore {
    capabilities: Mutex<BTreeMap<String, Capability>>,
}

impl MemoryCapabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, capability: Capability) {
        lock(&self.capabilities).insert(capability.id.clone(), capability);
    }
}

#[async_trait]
impl CapabilityStore for MemoryCapabilityStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Capability>> {
        Ok(lock(&self.capabilities).get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Capability>> {
        Ok(lock(&self.capabilities).values().cloned().collect())
    }
}
