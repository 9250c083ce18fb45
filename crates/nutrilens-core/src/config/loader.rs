//! Config loader: reads `~/.nutrilens/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.nutrilens/config.json`
//! 3. Environment variables `NUTRILENS_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `NUTRILENS_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `NUTRILENS_REMOTE__API_KEY` → `remote.api_key`
/// - `NUTRILENS_REMOTE__API_BASE` → `remote.api_base`
/// - `NUTRILENS_REMOTE__MODELS` → `remote.models` (comma-separated)
/// - `NUTRILENS_REMOTE__TIMEOUT_SECS` → `remote.timeout_secs`
/// - `NUTRILENS_QUOTA__DAILY_LIMIT` → `quota.daily_limit`
/// - `NUTRILENS_QUOTA__MONTHLY_LIMIT` → `quota.monthly_limit`
/// - `NUTRILENS_QUOTA__WARN_RATIO` → `quota.warn_ratio`
/// - `NUTRILENS_ON_DEVICE__ENABLED` / `NUTRILENS_ON_DEVICE__ENDPOINT`
/// - `NUTRILENS_PROBE__FORCE_OFFLINE` → `probe.force_offline`
fn apply_env_overrides(mut config: Config) -> Config {
    // Remote
    if let Ok(val) = std::env::var("NUTRILENS_REMOTE__API_KEY") {
        config.remote.api_key = val;
    }
    if let Ok(val) = std::env::var("NUTRILENS_REMOTE__API_BASE") {
        config.remote.api_base = Some(val);
    }
    if let Ok(val) = std::env::var("NUTRILENS_REMOTE__MODELS") {
        config.remote.models = val
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect();
    }
    if let Ok(val) = std::env::var("NUTRILENS_REMOTE__TIMEOUT_SECS") {
        if let Ok(n) = val.parse::<u64>() {
            config.remote.timeout_secs = n;
        }
    }

    // Quota
    if let Ok(val) = std::env::var("NUTRILENS_QUOTA__DAILY_LIMIT") {
        if let Ok(n) = val.parse::<u32>() {
            config.quota.daily_limit = n;
        }
    }
    if let Ok(val) = std::env::var("NUTRILENS_QUOTA__MONTHLY_LIMIT") {
        if let Ok(n) = val.parse::<u32>() {
            config.quota.monthly_limit = n;
        }
    }
    if let Ok(val) = std::env::var("NUTRILENS_QUOTA__WARN_RATIO") {
        if let Ok(r) = val.parse::<f64>() {
            config.quota.warn_ratio = r;
        }
    }

    // Local runtimes
    if let Ok(val) = std::env::var("NUTRILENS_ON_DEVICE__ENABLED") {
        config.on_device.enabled = parse_bool(&val);
    }
    if let Ok(val) = std::env::var("NUTRILENS_ON_DEVICE__ENDPOINT") {
        config.on_device.endpoint = val;
    }
    if let Ok(val) = std::env::var("NUTRILENS_IN_PROCESS__ENABLED") {
        config.in_process.enabled = parse_bool(&val);
    }

    // Probe
    if let Ok(val) = std::env::var("NUTRILENS_PROBE__FORCE_OFFLINE") {
        config.probe.force_offline = parse_bool(&val);
    }

    config
}

fn parse_bool(val: &str) -> bool {
    val == "true" || val == "1"
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
