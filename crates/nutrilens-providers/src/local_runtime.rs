//! Local model runtimes.
//!
//! The on-device classifier runs as a sidecar process reached over loopback
//! HTTP. Builds without a runtime wire the disabled stubs instead; they
//! answer the capability query with `false` and are never called.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use nutrilens_core::config::schema::OnDeviceConfig;
use nutrilens_core::types::ImageData;

use crate::traits::{Captioner, OnDeviceClassifier, Prediction};

// ─────────────────────────────────────────────
// Loopback classifier runtime
// ─────────────────────────────────────────────

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    image: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(default)]
    loaded: bool,
}

/// Client for a quantized classifier served on `127.0.0.1`.
///
/// Protocol:
/// - `GET {endpoint}/health` → `{"loaded": bool}`
/// - `POST {endpoint}/classify` with `{"image": <base64>, "mime_type": ...}`
///   → `{"predictions": [{"label": ..., "confidence": ...}]}`
///
/// Confidences in `0..=1` are scaled to percent.
pub struct LocalRuntimeClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl LocalRuntimeClassifier {
    pub fn new(config: &OnDeviceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OnDeviceClassifier for LocalRuntimeClassifier {
    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<HealthResponse>()
                .await
                .map(|h| h.loaded)
                .unwrap_or(false),
            Ok(resp) => {
                debug!(status = %resp.status(), "on-device runtime not healthy");
                false
            }
            Err(e) => {
                debug!(error = %e, "on-device runtime unreachable");
                false
            }
        }
    }

    async fn classify(&self, image: &ImageData) -> anyhow::Result<Prediction> {
        let url = format!("{}/classify", self.endpoint);
        let body = ClassifyRequest {
            image: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
            mime_type: &image.mime_type,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("on-device runtime request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("on-device runtime returned {}: {}", status, text);
        }

        let parsed: ClassifyResponse = response
            .json()
            .await
            .context("on-device runtime sent an invalid response")?;

        let top = parsed
            .predictions
            .into_iter()
            .filter(|p| p.confidence.is_finite())
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .context("on-device runtime returned no predictions")?;

        let confidence = if top.confidence <= 1.0 {
            top.confidence * 100.0
        } else {
            top.confidence
        };
        Ok(Prediction {
            label: top.label,
            confidence,
        })
    }

    fn display_name(&self) -> &str {
        "on-device classifier"
    }
}

// ─────────────────────────────────────────────
// Disabled stubs
// ─────────────────────────────────────────────

/// Stand-in when no on-device runtime is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledOnDevice;

#[async_trait]
impl OnDeviceClassifier for DisabledOnDevice {
    async fn is_available(&self) -> bool {
        false
    }

    async fn classify(&self, _image: &ImageData) -> anyhow::Result<Prediction> {
        bail!("on-device classifier is not available in this build")
    }

    fn display_name(&self) -> &str {
        "on-device classifier (disabled)"
    }
}

/// Stand-in when no captioning model is linked in.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCaptioner;

#[async_trait]
impl Captioner for DisabledCaptioner {
    async fn is_ready(&self) -> bool {
        false
    }

    async fn caption(&self, _image: &ImageData) -> anyhow::Result<String> {
        bail!("in-process captioner is not available in this build")
    }

    fn display_name(&self) -> &str {
        "in-process captioner (disabled)"
    }
}
