//! Keyed persistence for cache entries.
//!
//! [`CacheStore`] is the seam between the cache tiers and wherever entries
//! actually live. Two implementations exist in the workspace:
//!
//! - [`MemoryCacheStore`] (here) -- a process-local map
//! - `SqliteCacheStore` (in `spendguard-db`) -- survives restarts
//!
//! Stores filter expired entries at read time; [`CacheStore::purge_expired`]
//! is the explicit sweep.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use spendguard_types::CacheEntry;
use tokio::sync::RwLock;

use crate::error::CacheError;

/// Keyed storage for [`CacheEntry`] values.
///
/// Every method may suspend on I/O. Implementations must be safe to share
/// between tasks.
pub trait CacheStore: Send + Sync {
    /// Fetch the entry at `key` if it exists and is live at `now`.
    fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send;

    /// Insert or replace the entry at `entry.key`.
    fn put(&self, entry: CacheEntry) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Increment the hit counter of the entry at `key`, if present.
    fn record_hit(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Remove the entry at `key`. Returns whether anything was removed.
    fn remove(&self, key: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// All entries in `scope` that carry an embedding and are live at `now`.
    fn live_in_scope(
        &self,
        scope: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<CacheEntry>, CacheError>> + Send;

    /// Delete every entry expired at `now`. Returns the count removed.
    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, CacheError>> + Send;

    /// Delete everything. Returns the count removed.
    fn clear(&self) -> impl Future<Output = Result<u64, CacheError>> + Send;

    /// Number of stored entries, expired ones included.
    fn len(&self) -> impl Future<Output = Result<usize, CacheError>> + Send;
}

/// Expiry for an entry created at `created_at` with lifetime `ttl`.
///
/// Saturates at the maximum representable time.
pub fn expiry(created_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    created_at
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local [`CacheStore`] backed by a `HashMap`.
///
/// Enforces `max_entries` and `max_size_bytes` on every insert: expired
/// entries are dropped first, then the oldest live entries.
#[derive(Debug)]
pub struct MemoryCacheStore {
    max_entries: usize,
    max_size_bytes: usize,
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, CacheEntry>,
    size_bytes: usize,
}

impl MemoryInner {
    fn remove(&mut self, key: &str) -> bool {
        let Some(old) = self.entries.remove(key) else {
            return false;
        };
        self.size_bytes = self.size_bytes.saturating_sub(old.approx_size_bytes());
        true
    }

    fn over_capacity(&self, max_entries: usize, max_size_bytes: usize) -> bool {
        self.entries.len() > max_entries || self.size_bytes > max_size_bytes
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> u64 {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| !e.is_live(now))
            .map(|e| e.key.clone())
            .collect();
        let mut removed = 0u64;
        for key in expired {
            if self.remove(&key) {
                removed = removed.saturating_add(1);
            }
        }
        removed
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .values()
            .min_by_key(|e| e.created_at)
            .map(|e| e.key.clone());
        oldest.is_some_and(|key| self.remove(&key))
    }
}

impl MemoryCacheStore {
    /// Create an empty store with the given soft caps.
    pub fn new(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            max_entries,
            max_size_bytes,
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    /// Approximate bytes currently held.
    pub async fn size_bytes(&self) -> usize {
        self.inner.read().await.size_bytes
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(10_000, 100 * 1024 * 1024)
    }
}

impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(key).filter(|e| e.is_live(now)).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let now = entry.created_at;
        let key = entry.key.clone();
        let mut inner = self.inner.write().await;

        inner.remove(&key);
        inner.size_bytes = inner.size_bytes.saturating_add(entry.approx_size_bytes());
        inner.entries.insert(key.clone(), entry);

        if inner.over_capacity(self.max_entries, self.max_size_bytes) {
            let purged = inner.purge_expired(now);
            let mut evicted = 0u64;
            while inner.over_capacity(self.max_entries, self.max_size_bytes)
                && inner.entries.len() > 1
                && inner.evict_oldest()
            {
                evicted = evicted.saturating_add(1);
            }
            tracing::debug!(purged, evicted, %key, "Cache store over capacity");
        }
        Ok(())
    }

    async fn record_hit(&self, key: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.hit_count = entry.hit_count.saturating_add(1);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.inner.write().await.remove(key))
    }

    async fn live_in_scope(
        &self,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, CacheError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.scope == scope && e.embedding.is_some() && e.is_live(now))
            .cloned()
            .collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        Ok(self.inner.write().await.purge_expired(now))
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let mut inner = self.inner.write().await;
        let count = u64::try_from(inner.entries.len()).unwrap_or(u64::MAX);
        inner.entries.clear();
        inner.size_bytes = 0;
        Ok(count)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.inner.read().await.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use spendguard_types::CacheEntryId;

    use super::*;

    fn entry(key: &str, created_at: DateTime<Utc>, ttl: Duration) -> CacheEntry {
        CacheEntry {
            id: CacheEntryId::new(),
            key: key.to_owned(),
            scope: String::from("s"),
            embedding: None,
            response: String::from("response"),
            model: String::from("m"),
            input_tokens: 10,
            output_tokens: 5,
            cost: Decimal::ZERO,
            created_at,
            expires_at: created_at + ttl,
            hit_count: 0,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn get_hides_expired_entries() {
        let store = MemoryCacheStore::default();
        let now = Utc::now();
        store.put(entry("k", now, Duration::seconds(60))).await.ok();

        let live = store.get("k", now + Duration::seconds(59)).await.ok().flatten();
        assert!(live.is_some());
        let gone = store.get("k", now + Duration::seconds(60)).await.ok().flatten();
        assert!(gone.is_none());
        // Lazy filtering does not delete.
        assert_eq!(store.len().await.ok(), Some(1));
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = MemoryCacheStore::default();
        let now = Utc::now();
        store.put(entry("short", now, Duration::seconds(1))).await.ok();
        store.put(entry("long", now, Duration::hours(1))).await.ok();

        let removed = store.purge_expired(now + Duration::seconds(2)).await.ok();
        assert_eq!(removed, Some(1));
        assert_eq!(store.len().await.ok(), Some(1));
    }

    #[tokio::test]
    async fn record_hit_bumps_counter() {
        let store = MemoryCacheStore::default();
        let now = Utc::now();
        store.put(entry("k", now, Duration::hours(1))).await.ok();
        store.record_hit("k").await.ok();
        store.record_hit("k").await.ok();
        let hits = store.get("k", now).await.ok().flatten().map(|e| e.hit_count);
        assert_eq!(hits, Some(2));
    }

    #[tokio::test]
    async fn max_entries_evicts_oldest() {
        let store = MemoryCacheStore::new(2, usize::MAX);
        let now = Utc::now();
        store.put(entry("a", now, Duration::hours(1))).await.ok();
        store.put(entry("b", now + Duration::seconds(1), Duration::hours(1))).await.ok();
        store.put(entry("c", now + Duration::seconds(2), Duration::hours(1))).await.ok();

        assert_eq!(store.len().await.ok(), Some(2));
        assert!(store.get("a", now).await.ok().flatten().is_none());
        assert!(store.get("c", now).await.ok().flatten().is_some());
    }

    #[tokio::test]
    async fn replacing_key_keeps_size_accurate() {
        let store = MemoryCacheStore::default();
        let now = Utc::now();
        let e = entry("k", now, Duration::hours(1));
        let size = e.approx_size_bytes();
        store.put(e.clone()).await.ok();
        store.put(e).await.ok();
        assert_eq!(store.size_bytes().await, size);
    }
}
