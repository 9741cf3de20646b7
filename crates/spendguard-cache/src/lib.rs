//! Two-tier response cache for the Spendguard cost-control layer.
//!
//! A lookup tries an exact content-hash match first and falls back to an
//! embedding-similarity search. A hit means the paid model call is
//! skipped entirely; the manager counts tokens and money saved.
//!
//! # Modules
//!
//! - [`store`] -- [`CacheStore`] seam and the in-memory implementation
//! - [`exact`] -- Content-hash keys and the exact tier
//! - [`semantic`] -- [`Embedder`] seam, lexical fallback, similarity tier
//! - [`manager`] -- Unified get/set with accounting
//! - [`config`] -- TTLs, threshold, capacity caps
//! - [`error`] -- Cache error type

pub mod config;
pub mod error;
pub mod exact;
pub mod manager;
pub mod semantic;
pub mod store;

pub use config::CacheConfig;
pub use error::CacheError;
pub use exact::{ExactCache, cache_key, scope_key};
pub use manager::{CacheLookup, CacheManager, CacheStats, CacheWrite};
pub use semantic::{Embedder, LexicalEmbedder, SemanticCache, SemanticMatch, cosine_similarity};
pub use store::{CacheStore, MemoryCacheStore, expiry};
