//! Durable [`CacheStore`] on the `cache_entries` table.
//!
//! Rows are partitioned by [`CacheTier`] so the exact and semantic tiers
//! can share one database while keeping independent capacity caps. The
//! caps are soft: an insert that overflows purges expired rows first and
//! then evicts the oldest rows of the same tier.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use spendguard_cache::{CacheError, CacheStore};
use spendguard_types::{CacheEntry, CacheEntryId};
use sqlx::SqlitePool;

use crate::checkpoint_store::from_millis;
use crate::error::DbError;

/// Which cache tier a store instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Content-hash lookups.
    Exact,
    /// Embedding-similarity lookups.
    Semantic,
}

impl CacheTier {
    /// Value of the `tier` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Semantic => "semantic",
        }
    }
}

/// [`CacheStore`] backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
    tier: CacheTier,
    max_entries: u64,
    max_size_bytes: u64,
}

impl SqliteCacheStore {
    /// A store for `tier` with the given soft caps.
    pub fn new(pool: SqlitePool, tier: CacheTier, max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            pool,
            tier,
            max_entries: u64::try_from(max_entries).unwrap_or(u64::MAX),
            max_size_bytes: u64::try_from(max_size_bytes).unwrap_or(u64::MAX),
        }
    }

    /// The tier this store serves.
    pub const fn tier(&self) -> CacheTier {
        self.tier
    }

    async fn usage(&self) -> Result<(u64, u64), DbError> {
        let (count, bytes): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries WHERE tier = $1",
        )
        .bind(self.tier.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok((
            u64::try_from(count).unwrap_or(0),
            u64::try_from(bytes).unwrap_or(0),
        ))
    }

    const fn over_capacity(&self, (count, bytes): (u64, u64)) -> bool {
        count > self.max_entries || bytes > self.max_size_bytes
    }

    async fn put_row(&self, entry: &CacheEntry) -> Result<(), DbError> {
        let embedding = entry
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = entry
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let size = i64::try_from(entry.approx_size_bytes()).unwrap_or(i64::MAX);

        sqlx::query(
            r"INSERT OR REPLACE INTO cache_entries
              (tier, key, id, scope, embedding, response, model, input_tokens, output_tokens,
               cost, created_at, expires_at, hit_count, size_bytes, metadata)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(self.tier.as_str())
        .bind(&entry.key)
        .bind(entry.id.to_string())
        .bind(&entry.scope)
        .bind(embedding)
        .bind(&entry.response)
        .bind(&entry.model)
        .bind(i64::try_from(entry.input_tokens).unwrap_or(i64::MAX))
        .bind(i64::try_from(entry.output_tokens).unwrap_or(i64::MAX))
        .bind(entry.cost.to_string())
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .bind(i64::try_from(entry.hit_count).unwrap_or(i64::MAX))
        .bind(size)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        let mut usage = self.usage().await?;
        if !self.over_capacity(usage) {
            return Ok(());
        }
        let purged = self.purge_rows(entry.created_at).await?;
        usage = self.usage().await?;
        let mut evicted = 0u64;
        while self.over_capacity(usage) && usage.0 > 1 {
            let result = sqlx::query(
                r"DELETE FROM cache_entries
                  WHERE tier = $1 AND key = (
                    SELECT key FROM cache_entries
                    WHERE tier = $1 AND key != $2
                    ORDER BY created_at ASC
                    LIMIT 1
                  )",
            )
            .bind(self.tier.as_str())
            .bind(&entry.key)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                break;
            }
            evicted = evicted.saturating_add(1);
            usage = self.usage().await?;
        }
        tracing::debug!(
            tier = self.tier.as_str(),
            purged,
            evicted,
            "Durable cache over capacity"
        );
        Ok(())
    }

    async fn get_row(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, DbError> {
        let row = sqlx::query_as::<_, CacheRow>(
            r"SELECT key, id, scope, embedding, response, model, input_tokens, output_tokens,
                     cost, created_at, expires_at, hit_count, metadata
              FROM cache_entries
              WHERE tier = $1 AND key = $2 AND expires_at > $3",
        )
        .bind(self.tier.as_str())
        .bind(key)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;
        row.map(CacheRow::into_entry).transpose()
    }

    async fn scope_rows(&self, scope: &str, now: DateTime<Utc>) -> Result<Vec<CacheEntry>, DbError> {
        let rows = sqlx::query_as::<_, CacheRow>(
            r"SELECT key, id, scope, embedding, response, model, input_tokens, output_tokens,
                     cost, created_at, expires_at, hit_count, metadata
              FROM cache_entries
              WHERE tier = $1 AND scope = $2 AND embedding IS NOT NULL AND expires_at > $3",
        )
        .bind(self.tier.as_str())
        .bind(scope)
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CacheRow::into_entry).collect()
    }

    async fn purge_rows(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE tier = $1 AND expires_at <= $2")
            .bind(self.tier.as_str())
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.get_row(key, now).await?)
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        Ok(self.put_row(&entry).await?)
    }

    async fn record_hit(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("UPDATE cache_entries SET hit_count = hit_count + 1 WHERE tier = $1 AND key = $2")
            .bind(self.tier.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE tier = $1 AND key = $2")
            .bind(self.tier.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn live_in_scope(
        &self,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, CacheError> {
        Ok(self.scope_rows(scope, now).await?)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        Ok(self.purge_rows(now).await?)
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE tier = $1")
            .bind(self.tier.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(result.rows_affected())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        let (count, _) = self.usage().await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}

/// A row from the `cache_entries` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct CacheRow {
    key: String,
    id: String,
    scope: String,
    embedding: Option<String>,
    response: String,
    model: String,
    input_tokens: i64,
    output_tokens: i64,
    cost: String,
    created_at: i64,
    expires_at: i64,
    hit_count: i64,
    metadata: Option<String>,
}

impl CacheRow {
    fn into_entry(self) -> Result<CacheEntry, DbError> {
        let Self {
            key,
            id,
            scope,
            embedding,
            response,
            model,
            input_tokens,
            output_tokens,
            cost,
            created_at,
            expires_at,
            hit_count,
            metadata,
        } = self;
        let corrupt = |reason: String| DbError::Corrupt {
            id: key.clone(),
            reason,
        };
        let id = CacheEntryId::from_str(&id).map_err(|e| corrupt(format!("id: {e}")))?;
        let embedding = embedding
            .as_deref()
            .map(serde_json::from_str::<Vec<f32>>)
            .transpose()
            .map_err(|e| corrupt(format!("embedding: {e}")))?;
        let metadata = metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("metadata: {e}")))?;
        let cost = Decimal::from_str(&cost).map_err(|e| corrupt(format!("cost: {e}")))?;
        let created_at = from_millis(created_at)
            .ok_or_else(|| corrupt(String::from("created_at out of range")))?;
        let expires_at = from_millis(expires_at)
            .ok_or_else(|| corrupt(String::from("expires_at out of range")))?;

        Ok(CacheEntry {
            id,
            key,
            scope,
            embedding,
            response,
            model,
            input_tokens: u64::try_from(input_tokens).unwrap_or(0),
            output_tokens: u64::try_from(output_tokens).unwrap_or(0),
            cost,
            created_at,
            expires_at,
            hit_count: u64::try_from(hit_count).unwrap_or(0),
            metadata,
        })
    }
}
