//! Unified two-tier lookup and recording.
//!
//! The manager consults the exact tier first and only falls through to
//! the semantic tier on an exact miss. Writes go to both tiers. Hit/miss
//! counters and savings live here rather than in the stores, so they
//! describe what callers actually observed.

use std::sync::Mutex;

use rust_decimal::Decimal;
use serde::Serialize;
use spendguard_types::math::ratio;
use spendguard_types::{CacheEntry, CacheEntryId, Clock, MatchType};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::exact::{ExactCache, cache_key, scope_key};
use crate::semantic::{Embedder, SemanticCache};
use crate::store::{CacheStore, MemoryCacheStore};

/// A cache hit.
#[derive(Debug, Clone, Serialize)]
pub struct CacheLookup {
    /// The entry served.
    pub entry: CacheEntry,
    /// Which tier produced it.
    pub match_type: MatchType,
    /// Cosine similarity, for semantic hits.
    pub similarity: Option<f32>,
}

/// Everything about a completed downstream call except prompt and response.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    /// System prompt the request was sent with.
    pub system_prompt: Option<String>,
    /// Model that produced the response.
    pub model: String,
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
    /// What the call cost.
    pub cost: Decimal,
    /// Also write to the semantic tier.
    pub enable_semantic: bool,
    /// Opaque caller metadata stored alongside the entry.
    pub metadata: Option<serde_json::Value>,
}

impl CacheWrite {
    /// A write for `model` with semantic indexing enabled and zero usage.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost: Decimal::ZERO,
            enable_semantic: true,
            metadata: None,
        }
    }
}

/// Snapshot of cache effectiveness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Hits served by the exact tier.
    pub exact_hits: u64,
    /// Hits served by the semantic tier.
    pub semantic_hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 when nothing was looked up.
    pub hit_rate: f64,
    /// Tokens not re-spent thanks to hits.
    pub tokens_saved: u64,
    /// Money not re-spent thanks to hits.
    pub cost_saved: Decimal,
    /// Entries currently stored in the exact tier.
    pub exact_entries: usize,
    /// Entries currently stored in the semantic tier.
    pub semantic_entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    exact_hits: u64,
    semantic_hits: u64,
    misses: u64,
    tokens_saved: u64,
    cost_saved: Decimal,
}

impl Counters {
    fn record_hit(&mut self, entry: &CacheEntry, match_type: MatchType) {
        match match_type {
            MatchType::Exact => self.exact_hits = self.exact_hits.saturating_add(1),
            MatchType::Semantic => self.semantic_hits = self.semantic_hits.saturating_add(1),
        }
        self.tokens_saved = self.tokens_saved.saturating_add(entry.total_tokens());
        self.cost_saved = self.cost_saved.saturating_add(entry.cost);
    }

    fn hit_rate(&self) -> f64 {
        let hits = self.exact_hits.saturating_add(self.semantic_hits);
        ratio(hits, hits.saturating_add(self.misses))
    }
}

/// Exact-then-semantic response cache.
#[derive(Debug)]
pub struct CacheManager<S, E> {
    config: CacheConfig,
    exact: ExactCache<S>,
    semantic: SemanticCache<S, E>,
    clock: Clock,
    counters: Mutex<Counters>,
}

impl<E: Embedder> CacheManager<MemoryCacheStore, E> {
    /// Manager over two process-local stores sized from `config`.
    pub fn in_memory(config: CacheConfig, embedder: E, clock: Clock) -> Self {
        let exact = MemoryCacheStore::new(config.max_entries, config.max_size_bytes);
        let semantic = MemoryCacheStore::new(config.max_entries, config.max_size_bytes);
        Self::new(config, exact, semantic, embedder, clock)
    }
}

impl<S: CacheStore, E: Embedder> CacheManager<S, E> {
    /// Assemble a manager from one store per tier.
    pub fn new(
        config: CacheConfig,
        exact_store: S,
        semantic_store: S,
        embedder: E,
        clock: Clock,
    ) -> Self {
        let exact = ExactCache::new(exact_store, config.exact_ttl());
        let semantic = SemanticCache::new(
            semantic_store,
            embedder,
            config.similarity_threshold,
            config.semantic_ttl(),
        );
        Self {
            config,
            exact,
            semantic,
            clock,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Active configuration.
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a response for this request.
    ///
    /// Store and embedding failures are logged and count as a miss.
    pub async fn get(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
        allow_semantic: bool,
    ) -> Option<CacheLookup> {
        if !self.config.enabled {
            return None;
        }
        let now = self.clock.now();
        let key = cache_key(system_prompt, prompt, model);

        match self.exact.lookup(&key, now).await {
            Ok(Some(entry)) => {
                tracing::debug!(%key, hit_count = entry.hit_count, "Exact cache hit");
                return Some(self.hit(entry, MatchType::Exact, None));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, %key, "Exact cache lookup failed, treating as miss"),
        }

        if allow_semantic {
            let scope = scope_key(system_prompt, model);
            match self.semantic.find(prompt, &scope, now).await {
                Ok(Some(found)) => {
                    tracing::debug!(
                        key = %found.entry.key,
                        similarity = found.similarity,
                        "Semantic cache hit"
                    );
                    return Some(self.hit(found.entry, MatchType::Semantic, Some(found.similarity)));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Semantic cache lookup failed, treating as miss"),
            }
        }

        if let Ok(mut counters) = self.counters.lock() {
            counters.misses = counters.misses.saturating_add(1);
        }
        tracing::debug!(%key, "Cache miss");
        None
    }

    fn hit(&self, entry: CacheEntry, match_type: MatchType, similarity: Option<f32>) -> CacheLookup {
        if let Ok(mut counters) = self.counters.lock() {
            counters.record_hit(&entry, match_type);
        }
        CacheLookup {
            entry,
            match_type,
            similarity,
        }
    }

    /// Record a fresh response in the exact tier and, unless disabled, the
    /// semantic tier.
    ///
    /// Returns the exact-tier entry, or `None` when caching is disabled.
    /// Exact-tier store failures propagate; semantic-tier failures are
    /// logged and skipped.
    pub async fn set(
        &self,
        prompt: &str,
        response: &str,
        write: CacheWrite,
    ) -> Result<Option<CacheEntry>, CacheError> {
        if !self.config.enabled {
            return Ok(None);
        }
        let now = self.clock.now();
        let system = write.system_prompt.as_deref();
        let model = Some(write.model.as_str());

        let entry = CacheEntry {
            id: CacheEntryId::new(),
            key: cache_key(system, prompt, model),
            scope: scope_key(system, model),
            embedding: None,
            response: response.to_owned(),
            model: write.model.clone(),
            input_tokens: write.input_tokens,
            output_tokens: write.output_tokens,
            cost: write.cost,
            created_at: now,
            expires_at: now,
            hit_count: 0,
            metadata: write.metadata,
        };

        if write.enable_semantic {
            let semantic_entry = CacheEntry {
                id: CacheEntryId::new(),
                ..entry.clone()
            };
            if let Err(e) = self.semantic.insert(prompt, semantic_entry).await {
                tracing::warn!(error = %e, key = %entry.key, "Semantic cache write skipped");
            }
        }

        let stored = self.exact.insert(entry).await?;
        Ok(Some(stored))
    }

    /// Remove one request from both tiers. Returns whether anything was
    /// removed.
    pub async fn invalidate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<bool, CacheError> {
        let key = cache_key(system_prompt, prompt, model);
        let exact = self.exact.remove(&key).await?;
        let semantic = self.semantic.remove(&key).await?;
        Ok(exact || semantic)
    }

    /// Sweep expired entries from both tiers. Returns the count removed.
    pub async fn cleanup(&self) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let exact = self.exact.store().purge_expired(now).await?;
        let semantic = self.semantic.store().purge_expired(now).await?;
        let removed = exact.saturating_add(semantic);
        if removed > 0 {
            tracing::info!(exact, semantic, "Expired cache entries removed");
        }
        Ok(removed)
    }

    /// Empty both tiers. Returns the count removed.
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let exact = self.exact.store().clear().await?;
        let semantic = self.semantic.store().clear().await?;
        tracing::info!(exact, semantic, "Cache cleared");
        Ok(exact.saturating_add(semantic))
    }

    /// Counters plus current tier sizes.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let exact_entries = self.exact.store().len().await?;
        let semantic_entries = self.semantic.store().len().await?;
        let Ok(counters) = self.counters.lock() else {
            return Err(CacheError::Store("cache counters lock poisoned".to_owned()));
        };
        Ok(CacheStats {
            exact_hits: counters.exact_hits,
            semantic_hits: counters.semantic_hits,
            misses: counters.misses,
            hit_rate: counters.hit_rate(),
            tokens_saved: counters.tokens_saved,
            cost_saved: counters.cost_saved,
            exact_entries,
            semantic_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::semantic::LexicalEmbedder;

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CacheError> {
            Err(CacheError::Embedding("service unavailable".to_owned()))
        }
    }

    fn clock() -> Clock {
        Clock::manual(
            Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }

    fn write() -> CacheWrite {
        CacheWrite {
            system_prompt: Some(String::from("You are terse.")),
            model: String::from("claude-sonnet-4"),
            input_tokens: 1_200,
            output_tokens: 300,
            cost: dec!(0.0081),
            enable_semantic: true,
            metadata: None,
        }
    }

    fn manager(clock: &Clock) -> CacheManager<MemoryCacheStore, LexicalEmbedder> {
        CacheManager::in_memory(CacheConfig::default(), LexicalEmbedder::default(), clock.clone())
    }

    const SYS: Option<&str> = Some("You are terse.");
    const MODEL: Option<&str> = Some("claude-sonnet-4");

    #[tokio::test]
    async fn exact_hit_short_circuits_semantic_tier() {
        let clock = clock();
        let cache = manager(&clock);
        cache.set("What is Rust?", "A language.", write()).await.ok();

        let hit = cache.get("What is Rust?", SYS, MODEL, true).await;
        assert!(matches!(
            hit,
            Some(CacheLookup { match_type: MatchType::Exact, similarity: None, .. })
        ));

        let stats = cache.stats().await.ok();
        assert_eq!(stats.as_ref().map(|s| s.exact_hits), Some(1));
        assert_eq!(stats.as_ref().map(|s| s.semantic_hits), Some(0));
        assert_eq!(stats.as_ref().map(|s| s.tokens_saved), Some(1_500));
        assert_eq!(stats.map(|s| s.cost_saved), Some(dec!(0.0081)));
    }

    #[tokio::test]
    async fn near_duplicate_falls_through_to_semantic() {
        let clock = clock();
        let cache = manager(&clock);
        cache.set("What is Rust?", "A language.", write()).await.ok();

        let hit = cache.get("what is rust", SYS, MODEL, true).await;
        let Some(hit) = hit else {
            panic!("expected a semantic hit");
        };
        assert_eq!(hit.match_type, MatchType::Semantic);
        assert!(hit.similarity.is_some_and(|s| s >= 0.92));
        assert_eq!(hit.entry.response, "A language.");
    }

    #[tokio::test]
    async fn semantic_disallowed_is_a_miss() {
        let clock = clock();
        let cache = manager(&clock);
        cache.set("What is Rust?", "A language.", write()).await.ok();

        assert!(cache.get("what is rust", SYS, MODEL, false).await.is_none());
        assert_eq!(cache.stats().await.ok().map(|s| s.misses), Some(1));
    }

    #[tokio::test]
    async fn exact_ttl_boundary() {
        let clock = clock();
        let cache = manager(&clock);
        cache.set("prompt", "response", write()).await.ok();

        clock.advance(Duration::hours(24) - Duration::milliseconds(1));
        let before = cache.get("prompt", SYS, MODEL, false).await;
        assert!(before.is_some());

        clock.advance(Duration::milliseconds(1));
        let after = cache.get("prompt", SYS, MODEL, false).await;
        assert!(after.is_none());
    }

    #[tokio::test]
    async fn semantic_entries_expire_before_exact_ones() {
        let clock = clock();
        let cache = manager(&clock);
        cache.set("What is Rust?", "A language.", write()).await.ok();

        clock.advance(Duration::hours(13));
        assert!(cache.get("what is rust", SYS, MODEL, true).await.is_none());
        assert!(cache.get("What is Rust?", SYS, MODEL, true).await.is_some());
    }

    #[tokio::test]
    async fn disabled_cache_is_a_no_op() {
        let clock = clock();
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = CacheManager::in_memory(config, LexicalEmbedder::default(), clock);

        let stored = cache.set("prompt", "response", write()).await.ok().flatten();
        assert!(stored.is_none());
        assert!(cache.get("prompt", SYS, MODEL, true).await.is_none());

        let stats = cache.stats().await.ok();
        assert_eq!(stats.as_ref().map(|s| s.misses), Some(0));
        assert_eq!(stats.map(|s| s.exact_entries), Some(0));
    }

    #[tokio::test]
    async fn embedding_failure_still_writes_exact_tier() {
        let clock = clock();
        let cache = CacheManager::in_memory(CacheConfig::default(), FailingEmbedder, clock);

        let stored = cache.set("prompt", "response", write()).await;
        assert!(matches!(stored, Ok(Some(_))));
        assert!(cache.get("prompt", SYS, MODEL, true).await.is_some());

        let stats = cache.stats().await.ok();
        assert_eq!(stats.as_ref().map(|s| s.exact_entries), Some(1));
        assert_eq!(stats.map(|s| s.semantic_entries), Some(0));
    }

    #[tokio::test]
    async fn cleanup_sweeps_both_tiers() {
        let clock = clock();
        let cache = manager(&clock);
        cache.set("one", "1", write()).await.ok();
        cache.set("two", "2", write()).await.ok();

        clock.advance(Duration::hours(13));
        assert_eq!(cache.cleanup().await.ok(), Some(2));

        clock.advance(Duration::hours(12));
        assert_eq!(cache.cleanup().await.ok(), Some(2));
        assert_eq!(cache.stats().await.ok().map(|s| s.exact_entries), Some(0));
    }

    #[tokio::test]
    async fn invalidate_removes_from_both_tiers() {
        let clock = clock();
        let cache = manager(&clock);
        cache.set("What is Rust?", "A language.", write()).await.ok();

        assert_eq!(cache.invalidate("What is Rust?", SYS, MODEL).await.ok(), Some(true));
        assert!(cache.get("what is rust", SYS, MODEL, true).await.is_none());
        assert_eq!(cache.invalidate("What is Rust?", SYS, MODEL).await.ok(), Some(false));
    }

    #[tokio::test]
    async fn hit_rate_counts_both_tiers() {
        let clock = clock();
        let cache = manager(&clock);
        cache.set("What is Rust?", "A language.", write()).await.ok();

        cache.get("What is Rust?", SYS, MODEL, true).await;
        cache.get("what is rust", SYS, MODEL, true).await;
        cache.get("Explain monads", SYS, MODEL, true).await;
        cache.get("Explain functors", SYS, MODEL, true).await;

        let rate = cache.stats().await.ok().map(|s| s.hit_rate);
        assert!(rate.is_some_and(|r| (r - 0.5).abs() < 1e-9));
    }
}
