//! Compiles capabilities into the source blob passed to the isolate in
//! `init.capability_source`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::sanitize::{sanitize, SanitizationError};
use super::{Capability, CapabilityStore, PermissionInferrer, StoreResult};
use crate::metrics::METRICS;
use crate::obs;

/// A capability that made it into the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedCapability {
    pub id: String,
    /// Identifier exposed as `capabilities.<name>`.
    pub name: String,
    pub original_name: String,
    pub permission_set: Option<String>,
}

/// A capability left out of the bundle, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedCapability {
    pub id: String,
    pub name: String,
    pub error: SanitizationError,
}

/// Output of [`CapabilityInjector::compile`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityBundle {
    /// Registration script; empty when nothing was injected.
    pub source: String,
    pub injected: Vec<InjectedCapability>,
    pub dropped: Vec<DroppedCapability>,
}

impl CapabilityBundle {
    /// `None` when there is nothing to inject.
    pub fn source(&self) -> Option<&str> {
        (!self.source.is_empty()).then_some(self.source.as_str())
    }

    /// Exposed name → capability id.
    pub fn name_map(&self) -> BTreeMap<&str, &str> {
        self.injected
            .iter()
            .map(|c| (c.name.as_str(), c.id.as_str()))
            .collect()
    }
}

/// Validates and compiles capabilities. Runs entirely on the trusted side.
#[derive(Clone, Default)]
pub struct CapabilityInjector {
    inferrer: Option<Arc<dyn PermissionInferrer>>,
}

impl CapabilityInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inferrer(mut self, inferrer: Arc<dyn PermissionInferrer>) -> Self {
        self.inferrer = Some(inferrer);
        self
    }

    /// Sanitize each capability in order and emit one registration per
    /// survivor. Rejections are logged and reported, never fatal.
    #[instrument(skip_all, fields(candidates = capabilities.len()))]
    pub fn compile(&self, capabilities: &[Capability]) -> CapabilityBundle {
        let mut bundle = CapabilityBundle::default();
        let mut taken: HashSet<String> = HashSet::new();

        for capability in capabilities {
            if let Err(error) = sanitize(&capability.code) {
                obs::emit_capability_dropped(&capability.id, &capability.name, &error);
                METRICS.inc_capabilities_dropped();
                bundle.dropped.push(DroppedCapability {
                    id: capability.id.clone(),
                    name: capability.name.clone(),
                    error,
                });
                continue;
            }

            let name = unique_name(&normalize_name(&capability.name), &capability.id, &taken);
            taken.insert(name.clone());

            bundle.source.push_str(&registration(&name, &capability.id, &capability.code));
            let permission_set = capability.permission_set.clone().or_else(|| {
                self.inferrer
                    .as_ref()
                    .and_then(|inferrer| inferrer.infer(capability))
            });
            bundle.injected.push(InjectedCapability {
                id: capability.id.clone(),
                name,
                original_name: capability.name.clone(),
                permission_set,
            });
        }

        debug!(
            injected = bundle.injected.len(),
            dropped = bundle.dropped.len(),
            "capability bundle compiled"
        );
        bundle
    }

    /// Fetch `ids` from `store` and compile them. Unknown ids are skipped.
    pub async fn compile_from_store(
        &self,
        store: &dyn CapabilityStore,
        ids: &[String],
    ) -> StoreResult<CapabilityBundle> {
        let mut capabilities = Vec::with_capacity(ids.len());
        for id in ids {
            match store.get(id).await? {
                Some(capability) => capabilities.push(capability),
                None => warn!(capability_id = %id, "capability not found in store"),
            }
        }
        Ok(self.compile(&capabilities))
    }
}

fn registration(name: &str, id: &str, code: &str) -> String {
    // Names and ids are embedded as JSON string literals.
    let name = serde_json::Value::from(name).to_string();
    let id = serde_json::Value::from(id).to_string();
    format!("__toolgate.register({name}, {id}, async (args, tools, capabilities) => {{\n{code}\n}});\n")
}

/// Map an arbitrary name onto a JavaScript identifier.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '$' {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    let mut out = if trimmed.is_empty() {
        "capability".to_string()
    } else {
        trimmed.to_string()
    };
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Resolve collisions by appending a fragment of the id, then a counter.
fn unique_name(base: &str, id: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let fragment: String = id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    let candidate = format!("{base}_{fragment}");
    if !taken.contains(&candidate) {
        return candidate;
    }
    (2..)
        .map(|n| format!("{candidate}_{n}"))
        .find(|name| !taken.contains(name))
        .unwrap_or(candidate)
}
