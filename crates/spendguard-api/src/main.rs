//! `spendguard` binary: load configuration, open the database, and serve
//! the API.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (first argument, `SPENDGUARD_CONFIG`, or
//!    `spendguard.yaml` if present; defaults otherwise)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `SQLite` and run migrations
//! 4. Build the cost controller
//! 5. Start background maintenance
//! 6. Serve until `Ctrl-C`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use spendguard_api::{AppState, spawn_maintenance, start_server};
use spendguard_core::{CostController, LoggingConfig, SpendguardConfig};
use spendguard_types::Clock;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "spendguard.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, source) = load_config()?;
    init_logging(&config.logging);
    info!(config = %source, "spendguard starting");

    let controller = CostController::from_config(config.clone(), Clock::default())
        .await
        .context("failed to initialize the cost controller")?;
    info!(
        database = %config.storage.database_url,
        cache_backend = ?config.storage.cache_backend,
        "Cost controller ready"
    );

    let state = Arc::new(AppState::new(controller));

    let maintenance = config
        .server
        .maintenance_interval()
        .map(|interval| {
            info!(interval_secs = interval.as_secs(), "Background maintenance enabled");
            spawn_maintenance(Arc::clone(&state), interval)
        });

    start_server(&config.server, state)
        .await
        .context("API server failed")?;

    if let Some(handle) = maintenance {
        handle.abort();
    }
    info!("spendguard shutdown complete");
    Ok(())
}

/// Resolve and load the configuration file.
fn load_config() -> anyhow::Result<(SpendguardConfig, String)> {
    let explicit = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SPENDGUARD_CONFIG").ok())
        .map(PathBuf::from);

    if let Some(path) = explicit {
        let config = SpendguardConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        return Ok((config, path.display().to_string()));
    }

    let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        let config = SpendguardConfig::from_file(&default_path)
            .with_context(|| format!("failed to load {DEFAULT_CONFIG_PATH}"))?;
        return Ok((config, DEFAULT_CONFIG_PATH.to_owned()));
    }

    let config = SpendguardConfig::parse("").context("invalid environment overrides")?;
    Ok((config, "defaults".to_owned()))
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
