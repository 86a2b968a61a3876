//! Cache store boundary and an in-process implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use edge_core::{Clock, SystemClock};

use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::key::CacheKey;

/// Key-value store holding cache entries.
///
/// Eviction and replication belong to the implementation. Failures are
/// reported as [`crate::CacheError::StoreUnavailable`]; the orchestrator
/// degrades around them.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the entry stored under `key`, if any and not expired.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Store `entry` under `key` for `ttl`, overwriting unconditionally.
    async fn set(&self, key: &CacheKey, entry: CacheEntry, ttl: Duration) -> CacheResult<()>;

    /// Delete the entry stored under `key`.
    async fn delete(&self, _key: &CacheKey) -> CacheResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry, ttl: Duration) -> CacheResult<()> {
        (**self).set(key, entry, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<()> {
        (**self).delete(key).await
    }
}

#[derive(Debug, Clone)]
struct StoredItem {
    entry: CacheEntry,
    expires_at: u64,
}

/// In-memory store for development, tests and single-instance deployments.
pub struct InMemoryStore {
    items: DashMap<String, StoredItem>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store judging expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet read back.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let now = self.clock.now_secs();
        let expired = match self.items.get(key.as_str()) {
            Some(item) if item.expires_at > now => return Ok(Some(item.entry.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.items
                .remove_if(key.as_str(), |_, item| item.expires_at <= now);
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry, ttl: Duration) -> CacheResult<()> {
        let expires_at = self.clock.now_secs().saturating_add(ttl.as_secs());
        self.items
            .insert(key.as_str().to_string(), StoredItem { entry, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<()> {
        self.items.remove(key.as_str());
        Ok(())
    }
}
