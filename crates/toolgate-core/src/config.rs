//! Gateway configuration.
//!
//! Every struct deserializes with `#[serde(default)]`, so an embedder can
//! supply only the fields it wants to override. Loading from disk or the
//! environment is left to the embedder.

use serde::{Deserialize, Serialize};

use toolgate_protocol::DEFAULT_MAX_CAPABILITY_DEPTH;

/// Errors raised by [`GatewayConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

/// Result type for configuration checks.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration for a [`Gateway`](crate::Gateway).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub executor: ExecutorConfig,
    pub sandbox: SandboxConfig,
    pub cache: CacheConfig,
}

impl GatewayConfig {
    /// Reject values that would make the gateway unusable.
    pub fn validate(&self) -> ConfigResult<()> {
        self.executor.validate()?;
        self.sandbox.validate()?;
        self.cache.validate()
    }
}

/// Plan executor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Default per-task timeout (milliseconds), used when a task sets none.
    pub task_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            task_timeout_ms: 30_000,
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> ConfigResult<()> {
        positive("executor.task_timeout_ms", self.task_timeout_ms)
    }
}

/// Isolated execution context settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit for one sandbox run (milliseconds).
    pub timeout_ms: u64,
    /// V8 heap limit per isolate (bytes).
    pub max_heap_bytes: usize,
    /// Largest accepted user code (bytes).
    pub max_code_bytes: usize,
    /// Tool calls allowed per run; later calls get an error reply.
    pub max_tool_calls: usize,
    /// Capability call depth limit.
    pub max_capability_depth: u32,
    /// Isolates allowed to run at once.
    pub max_concurrent: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_heap_bytes: 64 * 1024 * 1024,
            max_code_bytes: 64 * 1024,
            max_tool_calls: 100,
            max_capability_depth: DEFAULT_MAX_CAPABILITY_DEPTH,
            max_concurrent: 8,
        }
    }
}

impl SandboxConfig {
    fn validate(&self) -> ConfigResult<()> {
        positive("sandbox.timeout_ms", self.timeout_ms)?;
        positive("sandbox.max_code_bytes", self.max_code_bytes as u64)?;
        positive("sandbox.max_concurrent", self.max_concurrent as u64)?;
        positive("sandbox.max_capability_depth", u64::from(self.max_capability_depth))?;
        if self.max_heap_bytes < 8 * 1024 * 1024 {
            return Err(ConfigError::InvalidConfig {
                field: "sandbox.max_heap_bytes",
                reason: format!("{} is below the 8 MiB minimum", self.max_heap_bytes),
            });
        }
        Ok(())
    }
}

/// Execution cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// When false the cache is a transparent pass-through.
    pub enabled: bool,
    pub max_entries: usize,
    /// Entry lifetime (milliseconds).
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
            ttl_ms: 300_000,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        positive("cache.max_entries", self.max_entries as u64)?;
        positive("cache.ttl_ms", self.ttl_ms)
    }
}

fn positive(field: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::InvalidConfig {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.executor.task_timeout_ms, 30_000);
        assert_eq!(cfg.sandbox.max_capability_depth, 3);
        assert_eq!(cfg.cache.max_entries, 100);
        assert_eq!(cfg.cache.ttl_ms, 300_000);
        assert!(cfg.cache.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: GatewayConfig =
            serde_json::from_str(r#"{"cache": {"max_entries": 5}}"#).unwrap();
        assert_eq!(cfg.cache.max_entries, 5);
        assert_eq!(cfg.cache.ttl_ms, 300_000);
        assert_eq!(cfg.sandbox, SandboxConfig::default());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut cfg = GatewayConfig::default();
        cfg.executor.task_timeout_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("executor.task_timeout_ms"));
    }

    #[test]
    fn test_disabled_cache_skips_capacity_check() {
        let mut cfg = GatewayConfig::default();
        cfg.cache.enabled = false;
        cfg.cache.max_entries = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_tiny_heap_rejected() {
        let mut cfg = GatewayConfig::default();
        cfg.sandbox.max_heap_bytes = 1024;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidConfig { field: "sandbox.max_heap_bytes", .. })
        ));
    }
}
