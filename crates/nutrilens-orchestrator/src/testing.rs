//! Fakes and fixtures shared by the orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use nutrilens_core::quota::{LedgerSettings, QuotaLedger, QuotaLimits, SystemClock};
use nutrilens_core::store::MemoryStore;
use nutrilens_core::types::{BackendKind, CandidateBackend, ImageData, ImageRef};
use nutrilens_core::ProviderError;
use nutrilens_providers::probe::StaticProbe;
use nutrilens_providers::registry::ProviderRegistry;
use nutrilens_providers::traits::{Captioner, OnDeviceClassifier, Prediction, RemoteRecognizer};

use crate::orchestrator::{Orchestrator, OrchestratorSettings};

// ─────────────────────────────────────────────
// Remote
// ─────────────────────────────────────────────

#[derive(Clone)]
enum Script {
    Reply(String),
    Fail(ProviderError),
    Hang,
}

/// Remote recognizer answering from a per-model script. Unscripted models
/// answer `Unavailable`. Clones share the call log.
#[derive(Clone, Default)]
pub(crate) struct FakeRemote {
    scripts: HashMap<String, Script>,
    calls: Arc<Mutex<Vec<String>>>,
    missing_key: bool,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(mut self, model: &str, text: &str) -> Self {
        self.scripts.insert(model.to_string(), Script::Reply(text.to_string()));
        self
    }

    pub(crate) fn fail(mut self, model: &str, error: ProviderError) -> Self {
        self.scripts.insert(model.to_string(), Script::Fail(error));
        self
    }

    pub(crate) fn hang(mut self, model: &str) -> Self {
        self.scripts.insert(model.to_string(), Script::Hang);
        self
    }

    /// Report no credentials.
    pub(crate) fn without_key(mut self) -> Self {
        self.missing_key = true;
        self
    }

    /// Models called so far, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteRecognizer for FakeRemote {
    async fn recognize(&self, model: &str, _image: &ImageData) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(model.to_string());
        match self.scripts.get(model).cloned() {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Network("hung call finished".into()))
            }
            None => Err(ProviderError::Unavailable(format!("404 model {} not found", model))),
        }
    }

    fn is_configured(&self) -> bool {
        !self.missing_key
    }

    fn display_name(&self) -> &str {
        "Fake"
    }
}

// ─────────────────────────────────────────────
// Local runtimes
// ─────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct FakeOnDevice {
    prediction: Option<Prediction>,
    calls: Arc<AtomicUsize>,
}

impl FakeOnDevice {
    pub(crate) fn predicting(label: &str, confidence: f64) -> Self {
        Self {
            prediction: Some(Prediction {
                label: label.to_string(),
                confidence,
            }),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            prediction: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OnDeviceClassifier for FakeOnDevice {
    async fn is_available(&self) -> bool {
        self.prediction.is_some()
    }

    async fn classify(&self, _image: &ImageData) -> anyhow::Result<Prediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prediction
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model not loaded"))
    }

    fn display_name(&self) -> &str {
        "fake classifier"
    }
}

/// Ready captioner; `None` makes every caption call fail.
#[derive(Clone)]
pub(crate) struct FakeCaptioner {
    caption: Option<String>,
}

impl FakeCaptioner {
    pub(crate) fn saying(caption: &str) -> Self {
        Self {
            caption: Some(caption.to_string()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self { caption: None }
    }
}

#[async_trait]
impl Captioner for FakeCaptioner {
    async fn is_ready(&self) -> bool {
        true
    }

    async fn caption(&self, _image: &ImageData) -> anyhow::Result<String> {
        self.caption
            .clone()
            .ok_or_else(|| anyhow::anyhow!("captioning crashed"))
    }

    fn display_name(&self) -> &str {
        "fake captioner"
    }
}

// ─────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────

/// One orchestrator fixture: registry, in-memory ledger, image on disk and
/// the fakes to wire in.
pub(crate) struct Harness {
    pub(crate) dir: TempDir,
    pub(crate) image: ImageRef,
    pub(crate) ledger: Arc<QuotaLedger>,
    registry: ProviderRegistry,
    remote: Option<FakeRemote>,
    on_device: Option<FakeOnDevice>,
    captioner: Option<FakeCaptioner>,
    online: bool,
}

impl Harness {
    /// Remote `gemini` with `models` and a daily cap (0 = uncapped), plus
    /// both local backends.
    pub(crate) fn new(models: &[&str], daily_limit: u32) -> Self {
        let models = models.iter().map(|m| m.to_string()).collect();
        Self::build(
            vec![
                CandidateBackend::remote("gemini", models),
                CandidateBackend::local("on-device", BackendKind::OnDevice),
                CandidateBackend::local("in-process", BackendKind::InProcess),
            ],
            daily_limit,
        )
    }

    /// Only the two local backends.
    pub(crate) fn local_only() -> Self {
        Self::build(
            vec![
                CandidateBackend::local("on-device", BackendKind::OnDevice),
                CandidateBackend::local("in-process", BackendKind::InProcess),
            ],
            0,
        )
    }

    fn build(backends: Vec<CandidateBackend>, daily_limit: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meal.jpg");
        std::fs::write(&path, b"\xff\xd8\xff\xe0 not really a jpeg").unwrap();

        let ledger = Arc::new(QuotaLedger::load(
            Arc::new(MemoryStore::new()),
            LedgerSettings::default().with_limits("gemini", QuotaLimits::new(daily_limit, 0)),
            Arc::new(SystemClock),
        ));

        Self {
            dir,
            image: ImageRef::new(path),
            ledger,
            registry: ProviderRegistry::new(backends).unwrap(),
            remote: None,
            on_device: None,
            captioner: None,
            online: true,
        }
    }

    pub(crate) fn remote(mut self, remote: FakeRemote) -> Self {
        self.remote = Some(remote);
        self
    }

    pub(crate) fn on_device(mut self, on_device: FakeOnDevice) -> Self {
        self.on_device = Some(on_device);
        self
    }

    pub(crate) fn captioner(mut self, captioner: FakeCaptioner) -> Self {
        self.captioner = Some(captioner);
        self
    }

    pub(crate) fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    pub(crate) fn orchestrator(&self) -> Orchestrator {
        let probe = if self.online {
            StaticProbe::online()
        } else {
            StaticProbe::offline()
        };
        let mut orchestrator = Orchestrator::new(
            self.registry.clone(),
            self.ledger.clone(),
            Arc::new(probe),
            OrchestratorSettings::default(),
        );
        if let Some(remote) = &self.remote {
            orchestrator = orchestrator.with_remote("gemini", Arc::new(remote.clone()));
        }
        if let Some(on_device) = &self.on_device {
            orchestrator = orchestrator.with_on_device(Arc::new(on_device.clone()));
        }
        if let Some(captioner) = &self.captioner {
            orchestrator = orchestrator.with_captioner(Arc::new(captioner.clone()));
        }
        orchestrator
    }

    /// Calls charged to `gemini` today.
    pub(crate) fn day_count(&self) -> u32 {
        self.ledger
            .report()
            .backend("gemini")
            .map(|b| b.day.count)
            .unwrap_or(0)
    }
}
