//! Embedding backends for the semantic cache tier.
//!
//! Uses enum dispatch over the concrete backends so the cache manager can
//! stay generic over a single [`Embedder`] type chosen at startup.

use std::time::Duration;

use spendguard_cache::{CacheError, Embedder, LexicalEmbedder};

use crate::config::{EmbeddingBackendKind, EmbeddingConfig};
use crate::retry::{RetryError, with_timeout_retry};

// ---------------------------------------------------------------------------
// Unified backend enum
// ---------------------------------------------------------------------------

/// The embedder selected by configuration.
#[derive(Debug)]
pub enum EmbeddingBackend {
    /// Local feature hashing, no network.
    Lexical(LexicalEmbedder),
    /// OpenAI-compatible embeddings endpoint.
    Http(HttpEmbedder),
}

impl EmbeddingBackend {
    /// Build the backend described by `config`.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        match (config.backend, config.url.as_deref()) {
            (EmbeddingBackendKind::Http, Some(url)) => {
                let api_key = std::env::var(&config.api_key_env).ok();
                Self::Http(HttpEmbedder::new(url, &config.model, api_key, config.timeout()))
            }
            (EmbeddingBackendKind::Http, None) => {
                tracing::warn!("embedding.url missing, falling back to the lexical embedder");
                Self::Lexical(LexicalEmbedder::new(config.dimensions))
            }
            (EmbeddingBackendKind::Lexical, _) => {
                Self::Lexical(LexicalEmbedder::new(config.dimensions))
            }
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Lexical(_) => "lexical",
            Self::Http(_) => "http",
        }
    }
}

impl Embedder for EmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CacheError> {
        match self {
            Self::Lexical(embedder) => embedder.embed(text).await,
            Self::Http(embedder) => embedder.embed(text).await,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// Client for an OpenAI-compatible `/embeddings` endpoint.
///
/// Each request has a fixed deadline and is retried once on timeout.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpEmbedder {
    /// Create a client for `{base_url}/embeddings`.
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_owned(),
            api_key,
            timeout,
        }
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, CacheError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CacheError::Embedding(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(CacheError::Embedding(format!(
                "embedding endpoint returned {status}: {error_body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CacheError::Embedding(format!("embedding response parse failed: {e}")))?;
        extract_embedding(&json)
    }
}

impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CacheError> {
        with_timeout_retry("embedding", self.timeout, move || self.request(text))
            .await
            .map_err(|e| match e {
                RetryError::Failed(inner) => inner,
                timed_out @ RetryError::TimedOut { .. } => {
                    CacheError::Embedding(timed_out.to_string())
                }
            })
    }
}

/// Extract `data[0].embedding` from an embeddings response.
fn extract_embedding(json: &serde_json::Value) -> Result<Vec<f32>, CacheError> {
    let values = json
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("embedding"))
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            CacheError::Embedding("embedding response missing data[0].embedding".to_owned())
        })?;

    let vector: Vec<f32> = values
        .iter()
        .filter_map(serde_json::Value::as_f64)
        .map(narrow)
        .collect();
    if vector.is_empty() || vector.len() != values.len() {
        return Err(CacheError::Embedding(
            "embedding contains non-numeric or no values".to_owned(),
        ));
    }
    Ok(vector)
}

#[allow(clippy::cast_possible_truncation)]
const fn narrow(v: f64) -> f32 {
    v as f32
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_openai_shape() {
        let body = json!({"data": [{"embedding": [0.25, -0.5, 1.0], "index": 0}]});
        let vector = extract_embedding(&body).ok();
        assert_eq!(vector, Some(vec![0.25, -0.5, 1.0]));
    }

    #[test]
    fn rejects_missing_or_bad_vectors() {
        assert!(extract_embedding(&json!({"data": []})).is_err());
        assert!(extract_embedding(&json!({"data": [{"embedding": []}]})).is_err());
        assert!(extract_embedding(&json!({"data": [{"embedding": [1.0, "x"]}]})).is_err());
    }

    #[test]
    fn url_is_normalized() {
        let embedder = HttpEmbedder::new("http://localhost:8080/v1/", "m", None, Duration::from_secs(1));
        assert_eq!(embedder.url, "http://localhost:8080/v1/embeddings");
    }

    #[tokio::test]
    async fn lexical_backend_from_default_config() {
        let backend = EmbeddingBackend::from_config(&EmbeddingConfig::default());
        assert_eq!(backend.name(), "lexical");
        let vector = backend.embed("hello world").await.unwrap_or_default();
        assert_eq!(vector.len(), 512);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_embedding_error() {
        let embedder = HttpEmbedder::new("http://127.0.0.1:9", "m", None, Duration::from_secs(2));
        let result = embedder.embed("hello").await;
        assert!(matches!(result, Err(CacheError::Embedding(_))));
    }
}
