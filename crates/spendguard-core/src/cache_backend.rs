//! Cache store selection.
//!
//! [`CacheBackend`] dispatches to the in-memory or `SQLite` store so the
//! controller holds one concrete [`CacheManager`] type regardless of
//! configuration.

use chrono::{DateTime, Utc};
use spendguard_cache::{CacheConfig, CacheError, CacheManager, CacheStore, MemoryCacheStore};
use spendguard_db::{CacheTier, Database, SqliteCacheStore};
use spendguard_types::{CacheEntry, Clock};

use crate::config::CacheBackendKind;
use crate::embedding::EmbeddingBackend;

/// The cache manager type the controller runs.
pub type Cache = CacheManager<CacheBackend, EmbeddingBackend>;

/// A cache store chosen at startup.
#[derive(Debug)]
pub enum CacheBackend {
    /// Process-local map.
    Memory(MemoryCacheStore),
    /// `cache_entries` table.
    Sqlite(SqliteCacheStore),
}

impl CacheBackend {
    fn for_tier(kind: CacheBackendKind, config: &CacheConfig, db: &Database, tier: CacheTier) -> Self {
        match kind {
            CacheBackendKind::Memory => {
                Self::Memory(MemoryCacheStore::new(config.max_entries, config.max_size_bytes))
            }
            CacheBackendKind::Sqlite => Self::Sqlite(SqliteCacheStore::new(
                db.pool().clone(),
                tier,
                config.max_entries,
                config.max_size_bytes,
            )),
        }
    }
}

/// Assemble the cache manager from configuration.
pub fn build_cache(
    kind: CacheBackendKind,
    config: CacheConfig,
    db: &Database,
    embedder: EmbeddingBackend,
    clock: Clock,
) -> Cache {
    let exact = CacheBackend::for_tier(kind, &config, db, CacheTier::Exact);
    let semantic = CacheBackend::for_tier(kind, &config, db, CacheTier::Semantic);
    tracing::info!(
        backend = ?kind,
        embedder = embedder.name(),
        enabled = config.enabled,
        "Response cache ready"
    );
    CacheManager::new(config, exact, semantic, embedder, clock)
}

impl CacheStore for CacheBackend {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
        match self {
            Self::Memory(store) => store.get(key, now).await,
            Self::Sqlite(store) => store.get(key, now).await,
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        match self {
            Self::Memory(store) => store.put(entry).await,
            Self::Sqlite(store) => store.put(entry).await,
        }
    }

    async fn record_hit(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::Memory(store) => store.record_hit(key).await,
            Self::Sqlite(store) => store.record_hit(key).await,
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        match self {
            Self::Memory(store) => store.remove(key).await,
            Self::Sqlite(store) => store.remove(key).await,
        }
    }

    async fn live_in_scope(
        &self,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, CacheError> {
        match self {
            Self::Memory(store) => store.live_in_scope(scope, now).await,
            Self::Sqlite(store) => store.live_in_scope(scope, now).await,
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        match self {
            Self::Memory(store) => store.purge_expired(now).await,
            Self::Sqlite(store) => store.purge_expired(now).await,
        }
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        match self {
            Self::Memory(store) => store.clear().await,
            Self::Sqlite(store) => store.clear().await,
        }
    }

    async fn len(&self) -> Result<usize, CacheError> {
        match self {
            Self::Memory(store) => store.len().await,
            Self::Sqlite(store) => store.len().await,
        }
    }
}
