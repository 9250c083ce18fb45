//! Provider registry: static backend specs plus the ordered runtime list
//! built once at startup.
//!
//! Each `BackendSpec` describes one known recognition source; the
//! [`ProviderRegistry`] turns the config into a fixed list of
//! [`CandidateBackend`]s and answers which of them are eligible right now.

use nutrilens_core::config::Config;
use nutrilens_core::quota::QuotaLedger;
use nutrilens_core::types::{BackendKind, CandidateBackend};
use nutrilens_core::RecognitionError;
use tracing::debug;

// ─────────────────────────────────────────────
// BackendSpec: static metadata for one backend
// ─────────────────────────────────────────────

/// Static specification describing one recognition backend.
#[derive(Clone, Debug)]
pub struct BackendSpec {
    /// Internal name, also the ledger key (e.g. `"gemini"`).
    pub name: &'static str,
    /// Human-readable name for logs.
    pub display_name: &'static str,
    pub kind: BackendKind,
    /// Model ids tried in order when the config doesn't list its own.
    pub default_models: &'static [&'static str],
    /// Default API base URL (remote backends only).
    pub default_api_base: Option<&'static str>,
}

impl BackendSpec {
    pub fn network_required(&self) -> bool {
        self.kind == BackendKind::RemoteMultimodel
    }
}

/// All known backend specifications.
pub static BACKENDS: &[BackendSpec] = &[
    // Gemini through its OpenAI-compatible surface. Each model has its own
    // free-tier capacity, so falling through the list is worthwhile.
    BackendSpec {
        name: "gemini",
        display_name: "Gemini",
        kind: BackendKind::RemoteMultimodel,
        default_models: &[
            "gemini-2.0-flash",
            "gemini-2.0-flash-lite",
            "gemini-1.5-flash",
            "gemini-1.5-flash-8b",
        ],
        default_api_base: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
    },
    BackendSpec {
        name: "openrouter",
        display_name: "OpenRouter",
        kind: BackendKind::RemoteMultimodel,
        default_models: &[
            "google/gemini-2.0-flash-exp:free",
            "meta-llama/llama-3.2-11b-vision-instruct:free",
            "qwen/qwen2.5-vl-72b-instruct:free",
        ],
        default_api_base: Some("https://openrouter.ai/api/v1"),
    },
    BackendSpec {
        name: "on-device",
        display_name: "On-device classifier",
        kind: BackendKind::OnDevice,
        default_models: &[],
        default_api_base: None,
    },
    BackendSpec {
        name: "in-process",
        display_name: "In-process captioner",
        kind: BackendKind::InProcess,
        default_models: &[],
        default_api_base: None,
    },
];

/// Find a backend entry by exact name.
pub fn find_by_name(name: &str) -> Option<&'static BackendSpec> {
    BACKENDS.iter().find(|spec| spec.name == name)
}

fn kind_rank(kind: BackendKind) -> u8 {
    match kind {
        BackendKind::RemoteMultimodel => 0,
        BackendKind::OnDevice => 1,
        BackendKind::InProcess => 2,
    }
}

// ─────────────────────────────────────────────
// ProviderRegistry
// ─────────────────────────────────────────────

/// The fixed, ordered list of candidate backends.
///
/// Order is always remote → on-device → in-process, regardless of the order
/// backends were supplied in.
#[derive(Clone, Debug)]
pub struct ProviderRegistry {
    backends: Vec<CandidateBackend>,
}

impl ProviderRegistry {
    /// Build a registry from an explicit backend list.
    ///
    /// Fails on an empty list or a remote backend without models.
    pub fn new(mut backends: Vec<CandidateBackend>) -> Result<Self, RecognitionError> {
        if backends.is_empty() {
            return Err(RecognitionError::EmptyRegistry);
        }
        if let Some(b) = backends
            .iter()
            .find(|b| b.kind == BackendKind::RemoteMultimodel && b.models.is_empty())
        {
            return Err(RecognitionError::NoModels(b.id.clone()));
        }
        backends.sort_by_key(|b| kind_rank(b.kind));
        Ok(Self { backends })
    }

    /// Build the registry from config.
    ///
    /// The remote backend is included only when it has an API key; local
    /// backends only when enabled.
    pub fn from_config(config: &Config) -> Result<Self, RecognitionError> {
        let mut backends = Vec::new();

        if config.remote.is_configured() {
            let models = if config.remote.models.is_empty() {
                find_by_name(&config.remote.backend)
                    .map(|spec| spec.default_models.iter().map(|m| m.to_string()).collect())
                    .unwrap_or_default()
            } else {
                config.remote.models.clone()
            };
            backends.push(CandidateBackend::remote(config.remote.backend.clone(), models));
        } else {
            debug!(backend = %config.remote.backend, "remote backend has no API key, skipping");
        }

        if config.on_device.enabled {
            backends.push(CandidateBackend::local("on-device", BackendKind::OnDevice));
        }
        if config.in_process.enabled {
            backends.push(CandidateBackend::local("in-process", BackendKind::InProcess));
        }

        Self::new(backends)
    }

    /// All backends, in fallback order.
    pub fn backends(&self) -> &[CandidateBackend] {
        &self.backends
    }

    /// The first backend of `kind`, if registered.
    pub fn first_of(&self, kind: BackendKind) -> Option<&CandidateBackend> {
        self.backends.iter().find(|b| b.kind == kind)
    }

    /// Backends that may be attempted now, in fallback order.
    ///
    /// Network-bound backends are dropped when offline; capped backends are
    /// dropped once the ledger blocks them.
    pub fn list_eligible(&self, online: bool, ledger: &QuotaLedger) -> Vec<&CandidateBackend> {
        self.backends
            .iter()
            .filter(|b| {
                if b.network_required && !online {
                    debug!(backend = %b.id, "skipping: offline");
                    return false;
                }
                if b.network_required {
                    let check = ledger.is_within_limits(&b.id);
                    if !check.allowed {
                        debug!(backend = %b.id, reason = ?check.reason, "skipping: quota");
                        return false;
                    }
                }
                true
            })
            .collect()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
