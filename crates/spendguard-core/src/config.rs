//! Configuration loading and typed config structures for Spendguard.
//!
//! The configuration lives in a YAML file (`spendguard.yaml` by default).
//! Every section is optional and falls back to defaults, so an empty file
//! is a valid configuration. A handful of deployment settings can be
//! overridden from the environment after parsing.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_budget::{AlertConfig, BudgetConfig};
use spendguard_cache::CacheConfig;
use spendguard_tracker::{ModelPricing, SubscriptionTier};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpendguardConfig {
    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Default budget for every owner.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Alert retention and high-cost floors.
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Per-model rate overrides layered on the built-in table.
    #[serde(default)]
    pub pricing: BTreeMap<String, ModelPricing>,

    /// Flat plans to compare pay-per-use spend against.
    #[serde(default = "default_subscriptions")]
    pub subscriptions: Vec<SubscriptionTier>,

    /// Durable storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding backend for the semantic cache tier.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// HTTP listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SpendguardConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            alerts: AlertConfig::default(),
            pricing: BTreeMap::new(),
            subscriptions: default_subscriptions(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SpendguardConfig {
    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment
    /// overrides, and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override deployment settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Some(host) = lookup("SPENDGUARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SPENDGUARD_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(level) = lookup("SPENDGUARD_LOG") {
            self.logging.level = level;
        }
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate().map_err(ConfigError::Invalid)?;
        self.budget
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.alerts
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        for tier in &self.subscriptions {
            if tier.monthly_price.is_sign_negative() {
                return Err(ConfigError::Invalid(format!(
                    "subscription '{}' has a negative price",
                    tier.name
                )));
            }
        }
        if self.embedding.backend == EmbeddingBackendKind::Http && self.embedding.url.is_none() {
            return Err(ConfigError::Invalid(
                "embedding.url is required for the http backend".to_owned(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where cache entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Process memory; lost on restart.
    #[default]
    Memory,
    /// The `SQLite` database.
    Sqlite,
}

/// Durable storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// `SQLite` URL for checkpoints (and the cache when durable).
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Cache store backend.
    #[serde(default)]
    pub cache_backend: CacheBackendKind,

    /// Workflows untouched for this many days are pruned by maintenance.
    #[serde(default = "default_workflow_retention_days")]
    pub workflow_retention_days: u32,

    /// Usage records older than this many days are pruned by maintenance.
    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            cache_backend: CacheBackendKind::default(),
            workflow_retention_days: default_workflow_retention_days(),
            metrics_retention_days: default_metrics_retention_days(),
        }
    }
}

/// Which embedder backs the semantic tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    /// Local feature-hashing embedder.
    #[default]
    Lexical,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

/// Embedding backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Backend kind.
    #[serde(default)]
    pub backend: EmbeddingBackendKind,

    /// Vector length for the lexical backend.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Base URL of the embeddings API (http backend).
    #[serde(default)]
    pub url: Option<String>,

    /// Embedding model name (http backend).
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Environment variable holding the API key (http backend).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-attempt timeout in milliseconds. One retry follows a timeout.
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

impl EmbeddingConfig {
    /// Per-attempt timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::default(),
            dimensions: default_dimensions(),
            url: None,
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between background maintenance sweeps. Zero disables them.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl ServerConfig {
    /// Sweep interval, or `None` when sweeps are disabled.
    pub const fn maintenance_interval(&self) -> Option<Duration> {
        if self.maintenance_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.maintenance_interval_secs))
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_subscriptions() -> Vec<SubscriptionTier> {
    vec![
        SubscriptionTier {
            name: "pro".to_owned(),
            monthly_price: Decimal::new(20, 0),
            covers_up_to: Some(Decimal::new(100, 0)),
        },
        SubscriptionTier {
            name: "max-5x".to_owned(),
            monthly_price: Decimal::new(100, 0),
            covers_up_to: Some(Decimal::new(500, 0)),
        },
        SubscriptionTier {
            name: "max-20x".to_owned(),
            monthly_price: Decimal::new(200, 0),
            covers_up_to: None,
        },
    ]
}

fn default_database_url() -> String {
    "sqlite://spendguard.db".to_owned()
}

const fn default_workflow_retention_days() -> u32 {
    30
}

const fn default_metrics_retention_days() -> u32 {
    90
}

const fn default_dimensions() -> usize {
    512
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_owned()
}

fn default_api_key_env() -> String {
    "EMBEDDING_API_KEY".to_owned()
}

const fn default_embedding_timeout_ms() -> u64 {
    5_000
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_port() -> u16 {
    8787
}

const fn default_maintenance_interval_secs() -> u64 {
    3_600
}

fn default_log_level() -> String {
    "info".to_owned()
}
