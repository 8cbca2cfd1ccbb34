//! Configuration loading and schema definitions for zafira-relay.
//!
//! This module provides types and functions for loading relay configuration
//! from TOML files or strings. The configuration schema covers the reporting
//! service connection, broker overrides, artifact persistence and the tuning
//! knobs of the relay itself.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads relay configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use zafira_relay::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("zafira.toml"))?;
/// println!("Service: {}", config.reporting.service_url);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads relay configuration from a TOML string.
///
/// # Example
///
/// ```
/// use zafira_relay::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [reporting]
///     service_url = "http://localhost:8080/zafira-ws"
///
///     [artifacts]
///     save_screenshots = true
/// "#)?;
///
/// assert!(config.artifacts.save_screenshots);
/// assert_eq!(config.broker.exchange, "logs");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
