//! CLI commands.

pub mod evict;
pub mod projects;
pub mod register;
pub mod restore;
pub mod status;
pub mod swap;

use anyhow::{Context, Result};
use bridge_core::{Config, Services};
use std::path::Path;

/// Loads the configuration and starts services over it.
pub fn open_services(config_path: &Path) -> Result<Services> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let services = Services::from_config(config).context("Failed to start bridge services")?;
    Ok(services)
}

/// Formats a byte count as GiB with two decimals.
pub fn gib(bytes: u64) -> String {
    format!("{:.2} GiB", bytes as f64 / bridge_core::GIB as f64)
}

/// Formats optional Unix milliseconds as RFC 3339, or `-`.
pub fn timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}
