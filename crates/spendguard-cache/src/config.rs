//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Default exact-match TTL: 24 hours.
const DEFAULT_EXACT_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Default semantic-match TTL: 12 hours.
const DEFAULT_SEMANTIC_TTL_MS: u64 = 12 * 60 * 60 * 1000;

/// Options recognized by the cache manager and its stores.
///
/// Mirrors the `cache:` section of `spendguard.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// When false, every lookup misses and every write is dropped.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime of exact-match entries in milliseconds.
    #[serde(default = "default_exact_ttl_ms")]
    pub exact_match_ttl_ms: u64,

    /// Lifetime of semantic-match entries in milliseconds.
    #[serde(default = "default_semantic_ttl_ms")]
    pub semantic_match_ttl_ms: u64,

    /// Minimum cosine similarity (0--1) for a semantic hit.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Soft cap on entries per tier.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Soft cap on the approximate bytes held per tier.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exact_match_ttl_ms: DEFAULT_EXACT_TTL_MS,
            semantic_match_ttl_ms: DEFAULT_SEMANTIC_TTL_MS,
            similarity_threshold: default_similarity_threshold(),
            max_entries: default_max_entries(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

impl CacheConfig {
    /// Exact-match TTL as a [`chrono::Duration`].
    pub fn exact_ttl(&self) -> chrono::Duration {
        millis(self.exact_match_ttl_ms)
    }

    /// Semantic-match TTL as a [`chrono::Duration`].
    pub fn semantic_ttl(&self) -> chrono::Duration {
        millis(self.semantic_match_ttl_ms)
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(format!(
                "cache.similarity_threshold must be within 0..=1, got {}",
                self.similarity_threshold
            ));
        }
        if self.exact_match_ttl_ms == 0 || self.semantic_match_ttl_ms == 0 {
            return Err("cache TTLs must be greater than zero".to_owned());
        }
        if self.max_entries == 0 {
            return Err("cache.max_entries must be greater than zero".to_owned());
        }
        Ok(())
    }
}

fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

const fn default_true() -> bool {
    true
}

const fn default_exact_ttl_ms() -> u64 {
    DEFAULT_EXACT_TTL_MS
}

const fn default_semantic_ttl_ms() -> u64 {
    DEFAULT_SEMANTIC_TTL_MS
}

const fn default_similarity_threshold() -> f32 {
    0.92
}

const fn default_max_entries() -> usize {
    10_000
}

const fn default_max_size_bytes() -> usize {
    100 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(config.validate().is_ok());
        assert_eq!(config.exact_ttl(), chrono::Duration::hours(24));
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let config = CacheConfig {
            similarity_threshold: 1.5,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
