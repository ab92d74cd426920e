//! Tool definitions handed to the isolate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of a tool offered by a backend server.
///
/// Only data: the isolate builds its own forwarding stubs from these records,
/// the real client never leaves the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Identifier of the backend server exposing the tool.
    pub server_id: String,
    /// Tool name, unique within its server.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool arguments.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDefinition {
    pub fn new(server_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            name: name.into(),
            description: String::new(),
            input_schema: empty_object_schema(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// `server:name`, the identifier used in trace events.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.server_id, self.name)
    }
}
