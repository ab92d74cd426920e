//! Memoization of whole sandbox runs.
//!
//! Entries are keyed by [`CacheKey`] and expire after the configured TTL.
//! Only successful outcomes are stored. With caching disabled every lookup
//! misses silently and nothing is stored.

pub mod key;
mod lru;

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;
use crate::sandbox::SandboxOutcome;

pub use key::{canonical_json, generate_cache_key, referenced_tools, tool_version, CacheKey};
use lru::LruArena;

/// A memoized outcome.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub outcome: SandboxOutcome,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// How long the original execution took; credited on every hit.
    pub latency_ms: u64,
}

/// Counters reported by [`ExecutionCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub avg_latency_saved_ms: f64,
    pub entries: usize,
}

struct CacheState {
    entries: LruArena<String, CacheEntry>,
    hits: u64,
    misses: u64,
    saved_ms: u64,
}

/// Bounded LRU + TTL cache in front of the sandbox.
pub struct ExecutionCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ExecutionCache {
    pub fn new(config: CacheConfig) -> Self {
        let state = CacheState {
            entries: LruArena::new(config.max_entries),
            hits: 0,
            misses: 0,
            saved_ms: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a live entry's outcome and mark it most recently used. An
    /// expired entry is purged and counted as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<SandboxOutcome> {
        if !self.config.enabled {
            return None;
        }
        let mut guard = self.lock();
        let state = &mut *guard;
        let now = Instant::now();

        let cached = state
            .entries
            .get(&key.digest)
            .map(|entry| (entry.expires_at > now, entry.outcome.clone(), entry.latency_ms));

        match cached {
            Some((true, outcome, latency_ms)) => {
                state.hits += 1;
                state.saved_ms += latency_ms;
                debug!(key = %key.digest, "cache hit");
                Some(outcome)
            }
            Some((false, ..)) => {
                state.entries.remove(&key.digest);
                state.misses += 1;
                debug!(key = %key.digest, "cache entry expired");
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Store a successful outcome. Failures are ignored.
    pub fn set(&self, key: CacheKey, outcome: &SandboxOutcome) {
        if !self.config.enabled || !outcome.success {
            return;
        }
        let now = Instant::now();
        let entry = CacheEntry {
            key: key.clone(),
            outcome: outcome.clone(),
            created_at: now,
            expires_at: now + Duration::from_millis(self.config.ttl_ms),
            latency_ms: outcome.duration_ms,
        };
        if let Some((evicted, _)) = self.lock().entries.insert(key.digest, entry) {
            debug!(key = %evicted, "cache entry evicted");
        }
    }

    /// Whether a live or expired entry exists for `key`, without touching
    /// recency or counters.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.peek(&key.digest).is_some()
    }

    /// Drop every entry whose key references `tool` (`server:name` or a bare
    /// name). Returns the number removed.
    pub fn invalidate(&self, tool: &str) -> usize {
        let removed = self
            .lock()
            .entries
            .remove_where(|_, entry| entry.key.references(tool));
        if removed > 0 {
            debug!(tool = %tool, removed, "cache entries invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            avg_latency_saved_ms: if state.hits == 0 {
                0.0
            } else {
                state.saved_ms as f64 / state.hits as f64
            },
            entries: state.entries.len(),
        }
    }
}
