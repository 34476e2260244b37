//! Cache store boundary, the in-memory store, and cache key strategies.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::key::join_parts;
use conduit_core::{Payload, RequestContext};
use quick_cache::sync::Cache;
use tokio::time::Instant;

/// Failure of the cache store itself.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store with optional per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the live value for `key`, or `None` on a miss or expired entry.
    async fn get(&self, key: &str) -> Result<Option<Payload>, CacheError>;

    /// Stores `value` under `key`. `ttl == None` means no expiry.
    async fn set(&self, key: &str, value: Payload, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

// ---------------------------------------------------------------------------
// InMemoryCacheStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedEntry {
    value: Payload,
    expires_at: Option<Instant>,
}

/// Bounded in-process store on `quick_cache`.
///
/// Expiry is lazy: an expired entry is dropped the next time it is read.
/// Capacity pressure evicts entries independently of TTL.
pub struct InMemoryCacheStore {
    entries: Cache<String, CachedEntry>,
}

impl InMemoryCacheStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for InMemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheStore")
            .field("len", &self.entries.len())
            .finish()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Payload>, CacheError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.expires_at.is_some_and(|at| Instant::now() >= at) {
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: Payload, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), CachedEntry { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Key strategies
// ---------------------------------------------------------------------------

/// Computes the cache key for a call. `None` means the call is not cached.
pub trait CacheKeyStrategy: Send + Sync {
    fn key(&self, ctx: &RequestContext) -> Option<String>;
}

/// `{prefix}:{operation}[:{part}...]` using the canonical key-part encoders,
/// e.g. `Op:GetUser:42`.
#[derive(Debug, Clone)]
pub struct OperationKeyStrategy {
    prefix: String,
}

impl OperationKeyStrategy {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for OperationKeyStrategy {
    fn default() -> Self {
        Self::new("Op")
    }
}

impl CacheKeyStrategy for OperationKeyStrategy {
    fn key(&self, ctx: &RequestContext) -> Option<String> {
        let parts = ctx.parameters();
        if parts.is_empty() {
            Some(format!("{}:{}", self.prefix, ctx.operation()))
        } else {
            Some(format!(
                "{}:{}:{}",
                self.prefix,
                ctx.operation(),
                join_parts(parts)
            ))
        }
    }
}
