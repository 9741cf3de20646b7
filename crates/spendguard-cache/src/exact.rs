//! Exact-match cache tier.
//!
//! Keys are a SHA-256 digest over `system|||prompt|||model` (empty string
//! for a missing field), hex-encoded and truncated to [`KEY_HEX_LEN`]
//! characters. Hashing is case- and whitespace-sensitive: two prompts that
//! differ by a trailing space are different requests.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use spendguard_types::CacheEntry;

use crate::error::CacheError;
use crate::store::{CacheStore, expiry};

/// Length of the stored hex key (128 bits of the digest).
pub const KEY_HEX_LEN: usize = 32;

/// Separator between hashed fields.
const FIELD_SEPARATOR: &str = "|||";

/// Deterministic cache key for a request.
pub fn cache_key(system_prompt: Option<&str>, prompt: &str, model: Option<&str>) -> String {
    digest(&[system_prompt.unwrap_or(""), prompt, model.unwrap_or("")])
}

/// Digest of the request context (system prompt and model) without the
/// prompt itself. Semantic matches are confined to one scope.
pub fn scope_key(system_prompt: Option<&str>, model: Option<&str>) -> String {
    digest(&[system_prompt.unwrap_or(""), model.unwrap_or("")])
}

fn digest(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(FIELD_SEPARATOR.as_bytes());
        }
        hasher.update(field.as_bytes());
    }
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(KEY_HEX_LEN);
    hex
}

/// O(1) lookup of responses by content hash.
#[derive(Debug)]
pub struct ExactCache<S> {
    store: S,
    ttl: Duration,
}

impl<S: CacheStore> ExactCache<S> {
    /// Wrap a store with the exact-match TTL.
    pub const fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The TTL applied to new entries.
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Look up `key`, bumping its hit counter on success.
    ///
    /// The returned entry already reflects the bumped counter.
    pub async fn lookup(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let Some(mut entry) = self.store.get(key, now).await? else {
            return Ok(None);
        };
        self.store.record_hit(key).await?;
        entry.hit_count = entry.hit_count.saturating_add(1);
        Ok(Some(entry))
    }

    /// Store `entry`, stamping its expiry from `created_at + ttl`.
    pub async fn insert(&self, mut entry: CacheEntry) -> Result<CacheEntry, CacheError> {
        entry.expires_at = expiry(entry.created_at, self.ttl);
        entry.embedding = None;
        self.store.put(entry.clone()).await?;
        tracing::debug!(key = %entry.key, model = %entry.model, "Exact cache entry stored");
        Ok(entry)
    }

    /// Remove the entry at `key`.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.store.remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let a = cache_key(Some("be brief"), "capital of France?", Some("claude-sonnet-4"));
        let b = cache_key(Some("be brief"), "capital of France?", Some("claude-sonnet-4"));
        assert_eq!(a, b);
        assert_eq!(a.len(), KEY_HEX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_is_case_and_whitespace_sensitive() {
        let base = cache_key(None, "Hello", None);
        assert_ne!(base, cache_key(None, "hello", None));
        assert_ne!(base, cache_key(None, "Hello ", None));
    }

    #[test]
    fn missing_fields_hash_as_empty_strings() {
        assert_eq!(cache_key(None, "p", None), cache_key(Some(""), "p", Some("")));
    }

    #[test]
    fn field_order_matters() {
        assert_ne!(
            cache_key(Some("sys"), "prompt", Some("model")),
            cache_key(Some("prompt"), "sys", Some("model"))
        );
    }

    #[test]
    fn scope_ignores_prompt() {
        assert_eq!(
            scope_key(Some("sys"), Some("m")),
            scope_key(Some("sys"), Some("m"))
        );
        assert_ne!(scope_key(Some("sys"), Some("m")), scope_key(Some("sys"), Some("n")));
    }
}
