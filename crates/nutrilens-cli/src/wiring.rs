//! Builds the runtime object graph from the loaded configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use nutrilens_core::config::Config;
use nutrilens_core::quota::{LedgerFlusher, LedgerSettings, QuotaLedger, SystemClock};
use nutrilens_core::store::FileStore;
use nutrilens_core::types::BackendKind;
use nutrilens_core::utils::get_state_path;
use nutrilens_orchestrator::{Orchestrator, OrchestratorSettings};
use nutrilens_providers::http_provider::HttpRecognizer;
use nutrilens_providers::local_runtime::LocalRuntimeClassifier;
use nutrilens_providers::probe::{ConnectivityProbe, HttpProbe, StaticProbe};
use nutrilens_providers::registry::{find_by_name, ProviderRegistry};

use crate::helpers::expand_tilde;

/// Everything a command needs: the orchestrator and the ledger's flusher.
pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub flusher: Arc<LedgerFlusher>,
}

/// Directory holding the ledger snapshot.
pub fn state_dir(config: &Config) -> PathBuf {
    config
        .state_dir
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(get_state_path)
}

/// Open the persisted ledger.
pub fn open_ledger(config: &Config) -> Result<Arc<QuotaLedger>> {
    let dir = state_dir(config);
    let store = FileStore::new(Some(dir.clone()))
        .with_context(|| format!("failed to open state directory {}", dir.display()))?;
    let settings = LedgerSettings::from_config(config.remote.backend.clone(), &config.quota);
    Ok(Arc::new(QuotaLedger::load(Arc::new(store), settings, Arc::new(SystemClock))))
}

/// Build the full runtime.
pub fn build(config: &Config) -> Result<Runtime> {
    let ledger = open_ledger(config)?;
    let registry = ProviderRegistry::from_config(config).context("no recognition backend is configured")?;

    let probe: Arc<dyn ConnectivityProbe> = if config.probe.force_offline {
        info!("forced offline mode, remote backends will be skipped");
        Arc::new(StaticProbe::offline())
    } else {
        Arc::new(HttpProbe::new(&config.probe))
    };

    let mut orchestrator = Orchestrator::new(
        registry.clone(),
        ledger.clone(),
        probe,
        OrchestratorSettings::from_config(config),
    );

    if let Some(remote) = registry.first_of(BackendKind::RemoteMultimodel) {
        let spec = find_by_name(&remote.id);
        if spec.is_none() {
            warn!(backend = %remote.id, "unknown remote backend, using the generic OpenAI-compatible client");
        }
        let client = HttpRecognizer::new(&config.remote, spec)
            .with_context(|| format!("failed to create client for {}", remote.id))?;
        orchestrator = orchestrator.with_remote(remote.id.clone(), Arc::new(client));
    }

    if registry.first_of(BackendKind::OnDevice).is_some() {
        let classifier =
            LocalRuntimeClassifier::new(&config.on_device).context("failed to create on-device runtime client")?;
        orchestrator = orchestrator.with_on_device(Arc::new(classifier));
    }

    if registry.first_of(BackendKind::InProcess).is_some() {
        warn!("in-process captioning is enabled but no captioning model is linked into this build");
    }

    let flusher = Arc::new(LedgerFlusher::new(ledger, Some(config.quota.flush_interval_secs)));

    Ok(Runtime {
        orchestrator: Arc::new(orchestrator),
        flusher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.state_dir = Some(dir.path().to_string_lossy().to_string());
        config
    }

    #[test]
    fn test_state_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(state_dir(&config(&dir)), dir.path());
        assert!(state_dir(&Config::default()).ends_with("state"));
    }

    #[test]
    fn test_build_without_backends_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build(&config(&dir)).is_err());
    }

    #[tokio::test]
    async fn test_build_forced_offline() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.remote.api_key = "test-key".to_string();
        config.on_device.enabled = true;
        config.on_device.endpoint = "http://127.0.0.1:1".to_string();
        config.probe.force_offline = true;

        let runtime = build(&config).unwrap();
        assert_eq!(runtime.orchestrator.registry().backends().len(), 2);

        let status = runtime.orchestrator.get_status().await;
        assert!(!status.online);
        assert!(!status.remote_available);
        assert_eq!(status.remote_limit, Some(50));
        assert!(!status.on_device_available);
        assert_eq!(status.recommended_backend, None);
    }

    #[test]
    fn test_ledger_round_trips_through_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);

        let ledger = open_ledger(&config).unwrap();
        ledger.record_attempt("gemini", true);
        assert!(ledger.flush().unwrap());

        let reopened = open_ledger(&config).unwrap();
        assert_eq!(reopened.report().backend("gemini").unwrap().day.count, 1);
    }
}
