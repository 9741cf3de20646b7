//! `SQLite` connection pool and configuration.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! so no database is needed at build time. All queries are parameterized.

use core::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::DbError;

/// Default maximum number of connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT_SECS: u64 = 10;

/// Configuration for the `SQLite` connection pool.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL, e.g. `sqlite://spendguard.db` or `sqlite::memory:`.
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection acquire timeout.
    pub connect_timeout: Duration,
}

impl SqliteConfig {
    /// Create a configuration from a database URL.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Connection pool handle to the `SQLite` database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database described by `config`.
    ///
    /// In-memory databases are pinned to a single connection that never
    /// idles out, since every new connection would see an empty database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed and
    /// [`DbError::Sqlite`] if the connection fails.
    pub async fn connect(config: &SqliteConfig) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DbError::Config(format!("invalid database URL: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS));

        let memory = config.is_memory();
        let (options, max_connections) = if memory {
            (options, 1)
        } else {
            (
                options.journal_mode(SqliteJournalMode::Wal),
                config.max_connections.max(1),
            )
        };

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(config.connect_timeout);
        if memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        tracing::info!(max_connections, memory, "Connected to SQLite");
        Ok(Self { pool })
    }

    /// Connect using a URL with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection fails.
    pub async fn connect_url(url: &str) -> Result<Self, DbError> {
        Self::connect(&SqliteConfig::new(url)).await
    }

    /// A fresh migrated in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or migrations fail.
    pub async fn in_memory() -> Result<Self, DbError> {
        let db = Self::connect_url("sqlite::memory:").await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations from the `migrations/` directory.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Return a reference to the underlying [`SqlitePool`].
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("SQLite pool closed");
    }
}
