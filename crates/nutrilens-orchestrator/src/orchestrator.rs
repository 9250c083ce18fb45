//! Recognition orchestrator: the fallback state machine.
//!
//! `START → TRY_REMOTE → TRY_ON_DEVICE → TRY_IN_PROCESS → SUCCESS | MANUAL`
//!
//! One call walks the eligible backends in registry order. The remote
//! backend fans out over its model list (sticky model first). Each model
//! call holds a [`QuotaLedger`] reservation that is charged only when the
//! provider actually answered.
//! Local backends never touch the ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, info};

use nutrilens_core::config::Config;
use nutrilens_core::quota::QuotaLedger;
use nutrilens_core::types::{
    AttemptStatus, BackendKind, CandidateBackend, ImageData, ImageRef, RecognitionResult,
};
use nutrilens_core::{ProviderError, RecognitionError};
use nutrilens_providers::local_runtime::{DisabledCaptioner, DisabledOnDevice};
use nutrilens_providers::normalizer::{normalize, RawPayload};
use nutrilens_providers::probe::ConnectivityProbe;
use nutrilens_providers::registry::ProviderRegistry;
use nutrilens_providers::traits::{Captioner, OnDeviceClassifier, RemoteRecognizer};

use crate::attempts::AttemptLog;

/// Default per-model remote timeout.
const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(15);
/// Default bound for local runtime calls.
const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default minimum on-device confidence, in percent.
const DEFAULT_MIN_ON_DEVICE_CONFIDENCE: f64 = 30.0;

/// Tunables for one orchestrator instance.
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub remote_timeout: Duration,
    pub local_timeout: Duration,
    pub min_on_device_confidence: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            local_timeout: DEFAULT_LOCAL_TIMEOUT,
            min_on_device_confidence: DEFAULT_MIN_ON_DEVICE_CONFIDENCE,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote_timeout: Duration::from_secs(config.remote.timeout_secs.max(1)),
            local_timeout: Duration::from_secs(
                config.on_device.timeout_secs.max(config.in_process.timeout_secs).max(1),
            ),
            min_on_device_confidence: config.on_device.min_confidence,
        }
    }
}

// ─────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────

/// Drives one recognition call across every eligible backend.
///
/// Safe to share behind an `Arc`: concurrent calls are independent state
/// machines that share only the ledger and the sticky-model map.
pub struct Orchestrator {
    pub(crate) registry: ProviderRegistry,
    pub(crate) ledger: Arc<QuotaLedger>,
    pub(crate) probe: Arc<dyn ConnectivityProbe>,
    remotes: HashMap<String, Arc<dyn RemoteRecognizer>>,
    pub(crate) on_device: Arc<dyn OnDeviceClassifier>,
    pub(crate) captioner: Arc<dyn Captioner>,
    /// Last model that produced a normalized success, per remote backend.
    sticky: Mutex<HashMap<String, String>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Create an orchestrator with disabled local runtimes and no remote
    /// clients. Attach collaborators with the `with_*` methods.
    pub fn new(
        registry: ProviderRegistry,
        ledger: Arc<QuotaLedger>,
        probe: Arc<dyn ConnectivityProbe>,
        settings: OrchestratorSettings,
    ) -> Self {
        info!(
            backends = registry.backends().len(),
            remote_timeout_s = settings.remote_timeout.as_secs(),
            "orchestrator initialized"
        );
        Self {
            registry,
            ledger,
            probe,
            remotes: HashMap::new(),
            on_device: Arc::new(DisabledOnDevice),
            captioner: Arc::new(DisabledCaptioner),
            sticky: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Attach the client serving remote backend `backend_id`.
    pub fn with_remote(mut self, backend_id: impl Into<String>, client: Arc<dyn RemoteRecognizer>) -> Self {
        self.remotes.insert(backend_id.into(), client);
        self
    }

    pub fn with_on_device(mut self, classifier: Arc<dyn OnDeviceClassifier>) -> Self {
        self.on_device = classifier;
        self
    }

    pub fn with_captioner(mut self, captioner: Arc<dyn Captioner>) -> Self {
        self.captioner = captioner;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    /// The model tried first on the next call to `backend_id`, if one has
    /// succeeded before.
    pub fn sticky_model(&self, backend_id: &str) -> Option<String> {
        self.sticky_lock().get(backend_id).cloned()
    }

    /// Whether `backend_id` has a client with credentials.
    pub(crate) fn remote_ready(&self, backend_id: &str) -> bool {
        self.remotes
            .get(backend_id)
            .is_some_and(|client| client.is_configured())
    }

    fn sticky_lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.sticky.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every registered remote backend must have a client.
    fn check_clients(&self) -> Result<(), RecognitionError> {
        for backend in self.registry.backends() {
            if backend.kind == BackendKind::RemoteMultimodel && !self.remotes.contains_key(&backend.id) {
                return Err(RecognitionError::MissingClient(backend.id.clone()));
            }
        }
        Ok(())
    }

    /// Recognize the food in `image`.
    ///
    /// Always resolves to a [`RecognitionResult`] (possibly the terminal
    /// manual one). `Err` is reserved for wiring mistakes and unreadable
    /// images.
    pub async fn recognize(&self, image: &ImageRef) -> Result<RecognitionResult, RecognitionError> {
        self.check_clients()?;
        let data = image.load().await.map_err(|source| RecognitionError::Image {
            path: image.path().display().to_string(),
            source,
        })?;

        let started = Instant::now();
        let mut log = AttemptLog::default();

        let online = self.probe.is_online().await;
        if !online && self.registry.first_of(BackendKind::RemoteMultimodel).is_some() {
            log.note_network("device is offline");
        }
        let eligible = self.registry.list_eligible(online, &self.ledger);
        self.note_skipped_remote(online, &eligible, &mut log);

        debug!(
            online,
            eligible = eligible.len(),
            image = %image.path().display(),
            "starting recognition"
        );

        for backend in eligible {
            let result = match backend.kind {
                BackendKind::RemoteMultimodel => self.try_remote(backend, &data, &mut log).await,
                BackendKind::OnDevice => self.try_on_device(backend, &data, &mut log).await,
                BackendKind::InProcess => self.try_in_process(backend, &data, &mut log).await,
            };
            if let Some(result) = result {
                info!(
                    backend = %backend.id,
                    items = result.items.len(),
                    confidence = %result.confidence,
                    remote_charges = log.charged_remote_calls(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "recognition succeeded"
                );
                return Ok(log.succeed(result.with_backend(&backend.id)));
            }
        }

        let result = log.manual();
        info!(
            attempts = result.attempts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "no backend recognized the image, falling back to manual entry"
        );
        Ok(result)
    }

    /// Explain why a registered remote backend was left out before any
    /// attempt was made.
    fn note_skipped_remote(&self, online: bool, eligible: &[&CandidateBackend], log: &mut AttemptLog) {
        let Some(remote) = self.registry.first_of(BackendKind::RemoteMultimodel) else {
            return;
        };
        if !online || eligible.iter().any(|b| b.id == remote.id) {
            return;
        }
        let check = self.ledger.is_within_limits(&remote.id);
        if let Some(reason) = check.reason {
            info!(backend = %remote.id, reason = %reason, "remote backend skipped");
            log.note_quota(reason);
        }
    }

    /// Model list with the sticky model moved to the front.
    fn ordered_models(&self, backend: &CandidateBackend) -> Vec<String> {
        let mut models = backend.models.clone();
        if let Some(sticky) = self.sticky_model(&backend.id) {
            if let Some(pos) = models.iter().position(|m| *m == sticky) {
                let model = models.remove(pos);
                models.insert(0, model);
            }
        }
        models
    }

    // ─────────────────────────────────────────
    // TRY_REMOTE
    // ─────────────────────────────────────────

    async fn try_remote(
        &self,
        backend: &CandidateBackend,
        image: &ImageData,
        log: &mut AttemptLog,
    ) -> Option<RecognitionResult> {
        let client = self.remotes.get(&backend.id)?;
        if !client.is_configured() {
            log.record(
                &backend.id,
                None,
                AttemptStatus::Unavailable,
                Duration::ZERO,
                format!("{} has no API key", client.display_name()),
            );
            return None;
        }

        for model in self.ordered_models(backend) {
            // Held across the call; dropped uncharged if this future is cancelled.
            let slot = match self.ledger.try_reserve(&backend.id) {
                Ok(slot) => slot,
                Err(check) => {
                    let reason = check
                        .reason
                        .unwrap_or_else(|| format!("{} quota reached", backend.id));
                    info!(backend = %backend.id, reason = %reason, "quota reached, skipping remaining models");
                    log.note_quota(reason);
                    break;
                }
            };

            let started = Instant::now();
            let reply = match timeout(self.settings.remote_timeout, client.recognize(&model, image)).await {
                Ok(reply) => reply,
                Err(_) => Err(ProviderError::Network(format!(
                    "no response within {}s",
                    self.settings.remote_timeout.as_secs()
                ))),
            };
            let latency = started.elapsed();

            let outcome = reply.and_then(|text| match normalize(RawPayload::Remote(&text)) {
                Ok(result) if result.items.is_empty() => {
                    Err(ProviderError::Malformed("reply listed no food items".to_string()))
                }
                Ok(result) => Ok(result),
                Err(e) => Err(ProviderError::Malformed(e.to_string())),
            });

            let status = match &outcome {
                Ok(_) => AttemptStatus::Success,
                Err(e) => e.status(),
            };
            if status.is_charged() {
                if let Some(advisory) = slot.commit(status == AttemptStatus::Success) {
                    log.note_advisory(advisory.message);
                }
            } else {
                slot.release();
            }

            match outcome {
                Ok(result) => {
                    log.record(&backend.id, Some(&model), status, latency, "");
                    self.sticky_lock().insert(backend.id.clone(), model);
                    return Some(result);
                }
                Err(err) => {
                    log.record(&backend.id, Some(&model), status, latency, err.detail());
                    match err {
                        ProviderError::QuotaExhausted(_) => {
                            self.ledger.mark_exhausted(&backend.id);
                            log.note_quota(format!("{} reported its daily quota exhausted", client.display_name()));
                            break;
                        }
                        ProviderError::RateLimited(_) => {
                            log.note_rate_limit(format!("{} is rate limiting requests", client.display_name()));
                        }
                        ProviderError::Network(detail) => log.note_network(detail),
                        ProviderError::Unavailable(_) | ProviderError::Malformed(_) => {}
                    }
                }
            }
        }

        None
    }

    // ─────────────────────────────────────────
    // TRY_ON_DEVICE
    // ─────────────────────────────────────────

    async fn try_on_device(
        &self,
        backend: &CandidateBackend,
        image: &ImageData,
        log: &mut AttemptLog,
    ) -> Option<RecognitionResult> {
        let name = self.on_device.display_name();
        if !self.on_device.is_available().await {
            log.record(
                &backend.id,
                None,
                AttemptStatus::Unavailable,
                Duration::ZERO,
                format!("{} not loaded", name),
            );
            return None;
        }

        let started = Instant::now();
        let prediction = match timeout(self.settings.local_timeout, self.on_device.classify(image)).await {
            Ok(Ok(prediction)) => prediction,
            Ok(Err(e)) => {
                log.record(
                    &backend.id,
                    None,
                    AttemptStatus::Unavailable,
                    started.elapsed(),
                    format!("{}: {}", name, e),
                );
                return None;
            }
            Err(_) => {
                log.record(
                    &backend.id,
                    None,
                    AttemptStatus::Unavailable,
                    started.elapsed(),
                    format!("{} did not answer in time", name),
                );
                return None;
            }
        };
        let latency = started.elapsed();

        if prediction.confidence < self.settings.min_on_device_confidence {
            log.record(
                &backend.id,
                None,
                AttemptStatus::Unavailable,
                latency,
                format!(
                    "top prediction '{}' at {:.0}% is below the {:.0}% minimum",
                    prediction.label, prediction.confidence, self.settings.min_on_device_confidence
                ),
            );
            return None;
        }

        match normalize(RawPayload::OnDevice(&prediction)) {
            Ok(result) => {
                log.record(&backend.id, None, AttemptStatus::Success, latency, "");
                Some(result)
            }
            Err(e) => {
                log.record(&backend.id, None, AttemptStatus::Malformed, latency, e.to_string());
                None
            }
        }
    }

    // ─────────────────────────────────────────
    // TRY_IN_PROCESS
    // ─────────────────────────────────────────

    async fn try_in_process(
        &self,
        backend: &CandidateBackend,
        image: &ImageData,
        log: &mut AttemptLog,
    ) -> Option<RecognitionResult> {
        let name = self.captioner.display_name();
        if !self.captioner.is_ready().await {
            log.record(
                &backend.id,
                None,
                AttemptStatus::Unavailable,
                Duration::ZERO,
                format!("{} not ready", name),
            );
            return None;
        }

        let started = Instant::now();
        let caption = match timeout(self.settings.local_timeout, self.captioner.caption(image)).await {
            Ok(Ok(caption)) => caption,
            Ok(Err(e)) => {
                log.record(
                    &backend.id,
                    None,
                    AttemptStatus::Unavailable,
                    started.elapsed(),
                    format!("{}: {}", name, e),
                );
                return None;
            }
            Err(_) => {
                log.record(
                    &backend.id,
                    None,
                    AttemptStatus::Unavailable,
                    started.elapsed(),
                    format!("{} did not answer in time", name),
                );
                return None;
            }
        };
        let latency = started.elapsed();

        match normalize(RawPayload::InProcess(&caption)) {
            Ok(result) if !result.items.is_empty() => {
                log.record(&backend.id, None, AttemptStatus::Success, latency, "");
                Some(result)
            }
            Ok(_) => {
                log.record(&backend.id, None, AttemptStatus::Malformed, latency, "empty caption");
                None
            }
            Err(e) => {
                log.record(&backend.id, None, AttemptStatus::Malformed, latency, e.to_string());
                None
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use nutrilens_core::types::Confidence;

    const PIZZA: &str = r#"{"items":[{"name":"Pizza","calories":266,"protein":11,"carbs":33,"fat":10,"portion_g":107,"portion_description":"1 slice"}],"confidence":"high"}"#;

    // ── Scenarios ──

    #[tokio::test]
    async fn test_scenario_a_remote_success() {
        let remote = FakeRemote::new().reply("m1", PIZZA);
        let h = Harness::new(&["m1", "m2"], 50).remote(remote.clone());

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.totals.calories, 266.0);
        assert_eq!(result.backend_id.as_deref(), Some("gemini"));
        assert!(result.warning.is_none());
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(remote.calls(), vec!["m1"]);
        assert_eq!(h.day_count(), 1);
    }

    #[tokio::test]
    async fn test_scenario_b_sticky_model() {
        let remote = FakeRemote::new().reply("m4", PIZZA);
        let h = Harness::new(&["m1", "m2", "m3", "m4"], 50).remote(remote.clone());
        let orchestrator = h.orchestrator();

        let first = orchestrator.recognize(&h.image).await.unwrap();
        assert!(!first.is_manual());
        assert_eq!(orchestrator.sticky_model("gemini").as_deref(), Some("m4"));

        orchestrator.recognize(&h.image).await.unwrap();
        assert_eq!(remote.calls(), vec!["m1", "m2", "m3", "m4", "m4"]);
        // Three unavailable replies were free; only the two successes count.
        assert_eq!(h.day_count(), 2);
    }

    #[tokio::test]
    async fn test_scenario_c_offline_skips_network() {
        let remote = FakeRemote::new().reply("m1", PIZZA);
        let on_device = FakeOnDevice::predicting("banana", 88.0);
        let h = Harness::new(&["m1"], 50)
            .remote(remote.clone())
            .on_device(on_device.clone())
            .offline();

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert!(remote.calls().is_empty());
        assert_eq!(on_device.calls(), 1);
        assert_eq!(result.backend_id.as_deref(), Some("on-device"));
        assert_eq!(result.items[0].name, "Banana");
        assert_eq!(h.day_count(), 0);
    }

    #[tokio::test]
    async fn test_scenario_d_local_cap_blocks_remote() {
        let remote = FakeRemote::new().reply("m1", PIZZA);
        let on_device = FakeOnDevice::predicting("pizza", 75.0);
        let h = Harness::new(&["m1"], 50).remote(remote.clone()).on_device(on_device);
        for _ in 0..50 {
            h.ledger.record_attempt("gemini", true);
        }
        let orchestrator = h.orchestrator();

        let status = orchestrator.get_status().await;
        assert!(!status.remote_available);
        assert_eq!(status.remote_remaining, Some(0));
        assert_eq!(status.remote_limit, Some(50));
        assert_eq!(status.recommended_backend.as_deref(), Some("on-device"));

        let result = orchestrator.recognize(&h.image).await.unwrap();
        assert!(remote.calls().is_empty());
        assert_eq!(result.backend_id.as_deref(), Some("on-device"));
        assert!(result.warning.unwrap().contains("daily limit of 50"));
        assert_eq!(h.day_count(), 50);
    }

    #[tokio::test]
    async fn test_scenario_e_everything_fails() {
        let remote = FakeRemote::new();
        let h = Harness::new(&["m1", "m2"], 50)
            .remote(remote.clone())
            .on_device(FakeOnDevice::unavailable())
            .captioner(FakeCaptioner::failing());

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert!(result.is_manual());
        assert!(result.items.is_empty());
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.backend_id.is_none());
        assert!(!result.explanation.unwrap().is_empty());
        // m1, m2, on-device, in-process
        assert_eq!(result.attempts.len(), 4);
    }

    // ── Charging rules ──

    #[tokio::test]
    async fn test_all_unavailable_reaches_on_device_without_charges() {
        let remote = FakeRemote::new()
            .fail("m1", ProviderError::Unavailable("404".into()))
            .fail("m2", ProviderError::Unavailable("503".into()));
        let on_device = FakeOnDevice::predicting("apple", 64.0);
        let h = Harness::new(&["m1", "m2"], 50).remote(remote).on_device(on_device.clone());

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert_eq!(on_device.calls(), 1);
        assert_eq!(result.backend_id.as_deref(), Some("on-device"));
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(h.day_count(), 0);
    }

    #[tokio::test]
    async fn test_quota_exhausted_aborts_remote() {
        let remote = FakeRemote::new()
            .fail("m1", ProviderError::QuotaExhausted("429 per day".into()))
            .reply("m2", PIZZA);
        let h = Harness::new(&["m1", "m2"], 50)
            .remote(remote.clone())
            .captioner(FakeCaptioner::saying("a bowl of ramen"));
        let orchestrator = h.orchestrator();

        let result = orchestrator.recognize(&h.image).await.unwrap();

        assert_eq!(remote.calls(), vec!["m1"]);
        assert_eq!(h.day_count(), 1);
        assert_eq!(result.backend_id.as_deref(), Some("in-process"));
        assert_eq!(result.items[0].name, "Ramen");
        assert!(result.warning.unwrap().contains("quota exhausted"));
        assert!(!h.ledger.is_within_limits("gemini").allowed);

        // Blocked for the rest of the day: the next call never reaches the provider.
        orchestrator.recognize(&h.image).await.unwrap();
        assert_eq!(remote.calls(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_quota_exhausted_explanation_wins() {
        let remote = FakeRemote::new()
            .fail("m1", ProviderError::Network("connection reset".into()))
            .fail("m2", ProviderError::QuotaExhausted("429 per day".into()));
        let h = Harness::new(&["m1", "m2"], 50).remote(remote);

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert!(result.is_manual());
        assert!(result.explanation.unwrap().contains("quota"));
    }

    #[tokio::test]
    async fn test_rate_limit_then_success_carries_warning() {
        let remote = FakeRemote::new()
            .fail("m1", ProviderError::RateLimited("429".into()))
            .reply("m2", PIZZA);
        let h = Harness::new(&["m1", "m2"], 50).remote(remote.clone());

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert_eq!(result.backend_id.as_deref(), Some("gemini"));
        assert!(result.warning.unwrap().contains("rate limiting"));
        assert_eq!(result.attempts[0].status, AttemptStatus::RateLimited);
        assert_eq!(result.attempts[1].status, AttemptStatus::Success);
        assert_eq!(h.day_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_is_charged_and_not_sticky() {
        let remote = FakeRemote::new()
            .reply("m1", "Sorry, I can't help with that.")
            .reply("m2", r#"{"items":[],"confidence":"low"}"#)
            .fail("m3", ProviderError::Malformed("no content".into()));
        let h = Harness::new(&["m1", "m2", "m3"], 50).remote(remote.clone());
        let orchestrator = h.orchestrator();

        let result = orchestrator.recognize(&h.image).await.unwrap();

        assert!(result.is_manual());
        assert_eq!(remote.calls(), vec!["m1", "m2", "m3"]);
        assert!(result
            .attempts
            .iter()
            .filter(|a| a.backend_id == "gemini")
            .all(|a| a.status == AttemptStatus::Malformed));
        assert_eq!(h.day_count(), 3);
        assert!(orchestrator.sticky_model("gemini").is_none());
    }

    #[tokio::test]
    async fn test_network_errors_are_free_and_explained() {
        let remote = FakeRemote::new()
            .fail("m1", ProviderError::Network("dns lookup failed".into()))
            .fail("m2", ProviderError::Network("connection refused".into()));
        let h = Harness::new(&["m1", "m2"], 50).remote(remote);

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert!(result.is_manual());
        assert_eq!(h.day_count(), 0);
        assert!(result.explanation.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout_is_network_error() {
        let remote = FakeRemote::new().hang("m1").reply("m2", PIZZA);
        let h = Harness::new(&["m1", "m2"], 50).remote(remote.clone());

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert_eq!(result.attempts[0].status, AttemptStatus::NetworkError);
        assert!(result.attempts[0].error.contains("15s"));
        assert_eq!(result.backend_id.as_deref(), Some("gemini"));
        assert_eq!(h.day_count(), 1);
    }

    #[tokio::test]
    async fn test_ledger_cap_reached_mid_loop() {
        let remote = FakeRemote::new()
            .fail("m1", ProviderError::RateLimited("429".into()))
            .fail("m2", ProviderError::RateLimited("429".into()))
            .reply("m3", PIZZA);
        let h = Harness::new(&["m1", "m2", "m3"], 2).remote(remote.clone());

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert_eq!(remote.calls(), vec!["m1", "m2"]);
        assert!(result.is_manual());
        assert!(result.explanation.unwrap().contains("daily limit of 2"));
        assert_eq!(h.day_count(), 2);
    }

    #[tokio::test]
    async fn test_warn_ratio_advisory_becomes_warning() {
        let remote = FakeRemote::new().reply("m1", PIZZA);
        let h = Harness::new(&["m1"], 5).remote(remote);
        for _ in 0..3 {
            h.ledger.record_attempt("gemini", true);
        }

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert_eq!(result.backend_id.as_deref(), Some("gemini"));
        assert!(result.warning.is_some());
    }

    // ── Local backends ──

    #[tokio::test]
    async fn test_low_confidence_on_device_falls_through() {
        let on_device = FakeOnDevice::predicting("pizza", 12.0);
        let h = Harness::local_only()
            .on_device(on_device)
            .captioner(FakeCaptioner::saying("two fried eggs on toast"));

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert_eq!(result.attempts[0].status, AttemptStatus::Unavailable);
        assert!(result.attempts[0].error.contains("below"));
        assert_eq!(result.backend_id.as_deref(), Some("in-process"));
        assert_eq!(result.items[0].name, "Egg");
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn test_caption_without_keyword_still_succeeds() {
        let h = Harness::local_only().captioner(FakeCaptioner::saying("a close up of a plate"));

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert_eq!(result.backend_id.as_deref(), Some("in-process"));
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.items.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_without_key_is_skipped_uncharged() {
        let remote = FakeRemote::new().reply("m1", PIZZA).without_key();
        let h = Harness::new(&["m1"], 50)
            .remote(remote.clone())
            .on_device(FakeOnDevice::predicting("apple", 80.0));

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert!(remote.calls().is_empty());
        assert_eq!(result.attempts[0].status, AttemptStatus::Unavailable);
        assert_eq!(result.attempts[0].error, "Fake has no API key");
        assert_eq!(result.backend_id.as_deref(), Some("on-device"));
        assert_eq!(h.day_count(), 0);
    }

    #[tokio::test]
    async fn test_local_attempt_notes_name_the_runtime() {
        let h = Harness::local_only()
            .on_device(FakeOnDevice::unavailable())
            .captioner(FakeCaptioner::failing());

        let result = h.orchestrator().recognize(&h.image).await.unwrap();

        assert!(result.is_manual());
        assert_eq!(result.attempts[0].error, "fake classifier not loaded");
        assert_eq!(result.attempts[1].error, "fake captioner: captioning crashed");
    }

    // ── Errors ──

    #[tokio::test]
    async fn test_missing_remote_client_is_an_error() {
        let h = Harness::new(&["m1"], 50);
        let err = h.orchestrator().recognize(&h.image).await.unwrap_err();
        assert!(matches!(err, RecognitionError::MissingClient(id) if id == "gemini"));
    }

    #[tokio::test]
    async fn test_unreadable_image_is_an_error() {
        let h = Harness::local_only();
        let missing = ImageRef::new(h.dir.path().join("missing.jpg"));
        let err = h.orchestrator().recognize(&missing).await.unwrap_err();
        assert!(matches!(err, RecognitionError::Image { .. }));
    }

    // ── Concurrency ──

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_share_ledger() {
        let remote = FakeRemote::new().reply("m1", PIZZA);
        let h = Harness::new(&["m1"], 0).remote(remote);
        let orchestrator = Arc::new(h.orchestrator());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let orchestrator = orchestrator.clone();
            let image = h.image.clone();
            handles.push(tokio::spawn(async move { orchestrator.recognize(&image).await }));
        }
        for handle in handles {
            assert!(!handle.await.unwrap().unwrap().is_manual());
        }

        assert_eq!(h.day_count(), 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_never_overshoot_cap() {
        let remote = FakeRemote::new().reply("m1", PIZZA);
        let h = Harness::new(&["m1"], 1).remote(remote);
        let orchestrator = Arc::new(h.orchestrator());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let orchestrator = orchestrator.clone();
            let image = h.image.clone();
            handles.push(tokio::spawn(async move { orchestrator.recognize(&image).await }));
        }
        let mut recognized = 0;
        for handle in handles {
            if !handle.await.unwrap().unwrap().is_manual() {
                recognized += 1;
            }
        }

        assert_eq!(h.day_count(), 1);
        assert_eq!(recognized, 1);
    }

    #[tokio::test]
    async fn test_abandoned_call_is_not_charged() {
        let remote = FakeRemote::new().hang("m1");
        let h = Harness::new(&["m1"], 1).remote(remote.clone());
        let orchestrator = Arc::new(h.orchestrator());

        let task = {
            let orchestrator = orchestrator.clone();
            let image = h.image.clone();
            tokio::spawn(async move { orchestrator.recognize(&image).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // The in-flight call holds the only slot.
        assert!(h.ledger.try_reserve("gemini").is_err());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(h.day_count(), 0);
        assert!(h.ledger.try_reserve("gemini").is_ok());
    }

    #[tokio::test]
    async fn test_repeat_calls_same_terminal_class() {
        let h = Harness::local_only().on_device(FakeOnDevice::predicting("salad", 90.0));
        let orchestrator = h.orchestrator();
        let first = orchestrator.recognize(&h.image).await.unwrap();
        let second = orchestrator.recognize(&h.image).await.unwrap();
        assert_eq!(first.is_manual(), second.is_manual());
        assert_eq!(first.items, second.items);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.remote.timeout_secs = 10;
        config.on_device.min_confidence = 45.0;
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.remote_timeout, Duration::from_secs(10));
        assert_eq!(settings.local_timeout, Duration::from_secs(5));
        assert_eq!(settings.min_on_device_confidence, 45.0);
    }
}
