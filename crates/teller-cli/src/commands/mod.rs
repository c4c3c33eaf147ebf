//! CLI command implementations.

pub mod admin;
pub mod audit;
pub mod serve;

pub use admin::run_admin;
pub use audit::run_audit;
pub use serve::run_serve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use teller_core::{SledCredentialStore, TellerConfig};

/// Load the configuration file with environment overrides applied.
///
/// # Errors
///
/// Returns error if the file cannot be parsed or the result is invalid.
pub fn load_config() -> anyhow::Result<TellerConfig> {
    let config = TellerConfig::load_default()
        .with_context(|| {
            format!(
                "Failed to load configuration from {}",
                TellerConfig::default_path().display()
            )
        })?
        .with_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Open the credential store, preferring an explicit directory over the configured one.
///
/// # Errors
///
/// Returns error if the directory cannot be created or the store cannot be opened.
pub fn open_store(
    data_dir: Option<PathBuf>,
    config: &TellerConfig,
) -> anyhow::Result<Arc<SledCredentialStore>> {
    let data_dir = data_dir.unwrap_or_else(|| config.data_dir());
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let store = SledCredentialStore::open(&data_dir, &config.store)
        .with_context(|| format!("Failed to open credential store at {}", data_dir.display()))?;
    Ok(Arc::new(store))
}
