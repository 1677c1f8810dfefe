//! Configuration loading for the gateway binary.

use crate::models::config::GatewayConfig;
use std::fs;
use std::path::Path;

/// Loads settings from the path in `PORTICO_CONFIG_PATH` (default
/// `config.json`).
///
/// # Errors
///
/// Returns an error when the file is missing, unreadable, or not valid JSON
/// for the [`GatewayConfig`] schema. Semantic checks (dangling backend
/// references, cycles) are the validator's job, not the loader's.
pub fn load_settings() -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let path =
        std::env::var("PORTICO_CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    load_settings_from_path(&path)
}

/// Loads and parses a configuration file from an explicit path.
pub fn load_settings_from_path(
    path: impl AsRef<Path>,
) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let raw = fs::read_to_string(path.as_ref()).map_err(|e| {
        format!(
            "failed to read config file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;
    let config: GatewayConfig = serde_json::from_str(&raw)
        .map_err(|e| format!("failed to parse config file: {}", e))?;
    Ok(config)
}
