//! Sync configuration.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Tunables for the orchestrator and the HTTP gateway it drives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote authority.
    pub base_url: String,
    /// Bound on each gateway request (in seconds).
    pub request_timeout_secs: u64,
    /// Delay between an offline→online transition and the automatic
    /// sync it triggers (in milliseconds).
    pub reconnect_debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout_secs: 10,  // bounded wait, on the order of seconds
            reconnect_debounce_ms: 1500,
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading sync config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("parsing sync config")
    }
}
