use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use toolgate_protocol::ToolDefinition;

use super::{ToolCallError, ToolCallResult, ToolClient};

/// A single backend tool.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    async fn call(&self, args: Value) -> std::result::Result<Value, String>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, String>> + Send + 'static,
{
    async fn call(&self, args: Value) -> std::result::Result<Value, String> {
        (self)(args).await
    }
}

struct Entry {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// In-memory [`ToolClient`] dispatching to registered handlers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Mutex<BTreeMap<(String, String), Entry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: impl ToolHandler,
    ) -> ToolCallResult<()> {
        let key = (definition.server_id.clone(), definition.name.clone());
        let mut tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&key) {
            return Err(ToolCallError::DuplicateTool {
                server: key.0,
                tool: key.1,
            });
        }
        debug!(tool = %definition.qualified_name(), "tool registered");
        tools.insert(
            key,
            Entry {
                definition,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Swap in a new definition for an existing tool, returning the old one.
    /// Cached sandbox results that referenced the tool should be invalidated
    /// by the caller.
    pub fn update_definition(&self, definition: ToolDefinition) -> ToolCallResult<ToolDefinition> {
        let mut tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (definition.server_id.clone(), definition.name.clone());
        match tools.get_mut(&key) {
            Some(entry) => Ok(std::mem::replace(&mut entry.definition, definition)),
            None => Err(ToolCallError::not_found(&key.0, &key.1)),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ToolClient for ToolRegistry {
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> ToolCallResult<Value> {
        let handler = {
            let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
            tools
                .get(&(server.to_string(), tool.to_string()))
                .map(|entry| entry.handler.clone())
                .ok_or_else(|| ToolCallError::not_found(server, tool))?
        };
        handler
            .call(args)
            .await
            .map_err(|message| ToolCallError::failed(server, tool, message))
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.definition.clone())
            .collect()
    }
}
