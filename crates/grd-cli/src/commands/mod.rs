//! Command handler modules for grd-cli.
//!
//! Shared helpers live here; command logic lives in the submodules.

pub mod order;
pub mod record;
pub mod scan;
pub mod settings;
pub mod vault;

use anyhow::{Context, Result};
use grd_config::GuardrailSettings;
use serde::de::DeserializeOwned;
use std::fs;

/// Read and parse a JSON file. A UTF-8 BOM is tolerated.
pub fn read_json_file<T: DeserializeOwned>(path: &str) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("read failed: {}", path))?;
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    let raw = std::str::from_utf8(bytes).with_context(|| format!("{} must be UTF-8 text", path))?;
    serde_json::from_str(raw.trim()).with_context(|| format!("{} must contain valid JSON", path))
}

/// Layered settings, or defaults when no paths are given.
pub fn load_settings(paths: &[String]) -> Result<GuardrailSettings> {
    if paths.is_empty() {
        return Ok(GuardrailSettings::default());
    }
    let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let (settings, loaded) = GuardrailSettings::load(&refs)?;
    tracing::info!(config_hash = %loaded.config_hash, "settings loaded");
    Ok(settings)
}
