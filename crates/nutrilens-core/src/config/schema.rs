//! Configuration schema.
//!
//! Hierarchy: `Config` → `RemoteConfig`, `QuotaConfig`, `OnDeviceConfig`,
//! `InProcessConfig`, `ProbeConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.nutrilens/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub quota: QuotaConfig,
    pub on_device: OnDeviceConfig,
    pub in_process: InProcessConfig,
    pub probe: ProbeConfig,
    /// Directory for ledger state (defaults to `~/.nutrilens/state`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
}

// ─────────────────────────────────────────────
// Remote
// ─────────────────────────────────────────────

/// The hosted multi-model backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfig {
    /// Registry id of the remote backend (e.g. `"gemini"`).
    pub backend: String,
    /// API key for Bearer authentication. Empty disables the backend.
    pub api_key: String,
    /// Custom API base URL (overrides the backend default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Ordered model ids. Empty means the backend's default list.
    pub models: Vec<String>,
    /// Per-model request timeout.
    pub timeout_secs: u64,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: "gemini".to_string(),
            api_key: String::new(),
            api_base: None,
            models: Vec::new(),
            timeout_secs: 15,
            extra_headers: None,
        }
    }
}

impl RemoteConfig {
    /// Whether the remote backend has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Quota
// ─────────────────────────────────────────────

/// Ledger caps and persistence cadence for the remote backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotaConfig {
    /// Calls per UTC day (0 = uncapped).
    pub daily_limit: u32,
    /// Calls per UTC month (0 = uncapped).
    pub monthly_limit: u32,
    /// Fraction of a cap at which a one-time advisory fires.
    pub warn_ratio: f64,
    /// Archived day buckets kept per backend.
    pub history_days: usize,
    /// Seconds between background ledger flushes.
    pub flush_interval_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 50,
            monthly_limit: 1500,
            warn_ratio: 0.8,
            history_days: 30,
            flush_interval_secs: 30,
        }
    }
}

// ─────────────────────────────────────────────
// Local runtimes
// ─────────────────────────────────────────────

/// On-device classifier runtime, reached over loopback.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnDeviceConfig {
    pub enabled: bool,
    /// Base URL of the local runtime (e.g. `http://127.0.0.1:8765`).
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Minimum top-prediction confidence (percent) to accept.
    pub min_confidence: f64,
}

impl Default for OnDeviceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://127.0.0.1:8765".to_string(),
            timeout_secs: 5,
            min_confidence: 30.0,
        }
    }
}

/// In-process captioning model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InProcessConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for InProcessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 5,
        }
    }
}

// ─────────────────────────────────────────────
// Probe
// ─────────────────────────────────────────────

/// Connectivity probe settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    /// URL hit with a HEAD request; any HTTP response means online.
    pub url: String,
    pub timeout_secs: u64,
    /// Skip probing and treat the device as offline.
    pub force_offline: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: "https://www.gstatic.com/generate_204".to_string(),
            timeout_secs: 3,
            force_offline: false,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
