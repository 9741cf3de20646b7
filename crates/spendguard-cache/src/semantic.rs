//! Semantic-similarity cache tier.
//!
//! Entries carry an embedding of the prompt. A lookup embeds the incoming
//! prompt, scans live entries in the same scope, and returns the closest
//! one if its cosine similarity reaches the configured threshold.
//!
//! Embedding computation is an external collaborator behind the
//! [`Embedder`] trait. [`LexicalEmbedder`] is a local fallback based on
//! SHA-256 feature hashing of word unigrams and bigrams; it catches
//! near-duplicate phrasings (case, punctuation, word order noise) but not
//! paraphrases.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use spendguard_types::CacheEntry;

use crate::error::CacheError;
use crate::store::{CacheStore, expiry};

/// Turns text into a fixed-length vector.
pub trait Embedder: Send + Sync {
    /// Embed `text`. The call may suspend on network I/O.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, CacheError>> + Send;
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ---------------------------------------------------------------------------
// Lexical fallback embedder
// ---------------------------------------------------------------------------

/// Default vector width for [`LexicalEmbedder`].
pub const DEFAULT_LEXICAL_DIMENSIONS: usize = 512;

/// Feature-hashing embedder over normalized word unigrams and bigrams.
#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dimensions: usize,
}

impl LexicalEmbedder {
    /// Create an embedder producing `dimensions`-wide vectors (minimum 1).
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous embedding, used directly by tests and the async impl.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut vector = vec![0.0f32; self.dimensions];
        for word in &words {
            self.add_feature(&mut vector, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            if let [left, right] = pair {
                let bigram = format!("{left} {right}");
                self.add_feature(&mut vector, bigram.as_bytes(), 0.5);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = feature_hash(feature);
        let dims = u64::try_from(self.dimensions).unwrap_or(u64::MAX);
        let slot = hash.checked_rem(dims).and_then(|s| usize::try_from(s).ok());
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        if let Some(v) = slot.and_then(|s| vector.get_mut(s)) {
            *v += sign * weight;
        }
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_LEXICAL_DIMENSIONS)
    }
}

impl Embedder for LexicalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CacheError> {
        Ok(self.embed_text(text))
    }
}

/// First eight bytes of the feature's SHA-256 digest.
fn feature_hash(feature: &[u8]) -> u64 {
    let digest = Sha256::digest(feature);
    let mut prefix = [0u8; 8];
    for (dst, src) in prefix.iter_mut().zip(digest.iter()) {
        *dst = *src;
    }
    u64::from_be_bytes(prefix)
}

// ---------------------------------------------------------------------------
// Semantic tier
// ---------------------------------------------------------------------------

/// Nearest-neighbour lookup over embedded entries.
#[derive(Debug)]
pub struct SemanticCache<S, E> {
    store: S,
    embedder: E,
    threshold: f32,
    ttl: Duration,
}

/// A semantic hit with its similarity score.
#[derive(Debug, Clone)]
pub struct SemanticMatch {
    /// The matched entry, hit counter already bumped.
    pub entry: CacheEntry,
    /// Cosine similarity between the query and the entry.
    pub similarity: f32,
}

impl<S: CacheStore, E: Embedder> SemanticCache<S, E> {
    /// Wrap a store and embedder with a similarity threshold and TTL.
    pub const fn new(store: S, embedder: E, threshold: f32, ttl: Duration) -> Self {
        Self {
            store,
            embedder,
            threshold,
            ttl,
        }
    }

    /// Underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Minimum similarity for a hit.
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Find the closest live entry in `scope` at or above the threshold.
    pub async fn find(
        &self,
        prompt: &str,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SemanticMatch>, CacheError> {
        let query = self.embedder.embed(prompt).await?;
        let candidates = self.store.live_in_scope(scope, now).await?;

        let best = candidates
            .into_iter()
            .filter_map(|entry| {
                let similarity = entry
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(&query, e))?;
                Some((entry, similarity))
            })
            .max_by(|(_, a), (_, b)| a.total_cmp(b));

        let Some((mut entry, similarity)) = best else {
            return Ok(None);
        };
        if similarity < self.threshold {
            tracing::trace!(similarity, threshold = self.threshold, "Closest entry below threshold");
            return Ok(None);
        }

        self.store.record_hit(&entry.key).await?;
        entry.hit_count = entry.hit_count.saturating_add(1);
        Ok(Some(SemanticMatch { entry, similarity }))
    }

    /// Embed `prompt` and store `entry` under it with the semantic TTL.
    pub async fn insert(&self, prompt: &str, mut entry: CacheEntry) -> Result<CacheEntry, CacheError> {
        let embedding = self.embedder.embed(prompt).await?;
        if embedding.is_empty() {
            return Err(CacheError::Embedding("embedder returned an empty vector".to_owned()));
        }
        entry.embedding = Some(embedding);
        entry.expires_at = expiry(entry.created_at, self.ttl);
        self.store.put(entry.clone()).await?;
        tracing::debug!(key = %entry.key, "Semantic cache entry stored");
        Ok(entry)
    }

    /// Remove the entry at `key`.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.store.remove(key).await
    }
}
