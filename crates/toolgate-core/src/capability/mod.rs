//! Learned capabilities: stored code fragments compiled into a source blob
//! the isolate registers behind its depth guard and tracing wrapper.

pub mod injector;
pub mod sanitize;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use injector::{CapabilityBundle, CapabilityInjector, DroppedCapability, InjectedCapability};
pub use sanitize::{sanitize, SanitizationError, SanitizationResult};

/// A previously learned code fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub name: String,
    /// Body of `async (args, tools, capabilities) => { ... }`.
    pub code: String,
    #[serde(default)]
    pub success_rate: f64,
    /// Label supplied by a [`PermissionInferrer`]; carried, not enforced.
    #[serde(default)]
    pub permission_set: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl Capability {
    pub fn new(id: impl Into<String>, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            code: code.into(),
            success_rate: 0.0,
            permission_set: None,
            confidence: 0.0,
        }
    }
}

/// Errors from a [`CapabilityStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("capability store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for capability store access.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Source of capability records. Persistence is owned by the embedder.
#[async_trait]
pub trait CapabilityStore: Send + Sync + 'static {
    async fn get(&self, id: &str) -> StoreResult<Option<Capability>>;

    async fn list(&self) -> StoreResult<Vec<Capability>>;
}

/// Assigns a permission-set label to a capability.
pub trait PermissionInferrer: Send + Sync + 'static {
    fn infer(&self, capability: &Capability) -> Option<String>;
}
