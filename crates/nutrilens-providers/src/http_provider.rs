//! HTTP client for the remote multi-model backend.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint that accepts
//! image content parts, and classifies every failure into the
//! [`ProviderError`] taxonomy the orchestrator branches on.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use tracing::{debug, warn};

use nutrilens_core::config::schema::RemoteConfig;
use nutrilens_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, ContentPart, ImageData, ImageUrl, Message,
};
use nutrilens_core::utils::truncate_string;
use nutrilens_core::ProviderError;

use crate::registry::BackendSpec;
use crate::traits::RemoteRecognizer;

/// Instructions sent with every image. The reply shape is what
/// [`crate::normalizer`] expects for remote payloads.
pub const RECOGNITION_PROMPT: &str = r#"You are a nutrition assistant. Identify every distinct food or drink in the image and estimate its nutrition for the visible portion.
Reply with JSON only, no prose, in exactly this shape:
{"items":[{"name":string,"calories":number,"protein":number,"carbs":number,"fat":number,"sugar":number|null,"fiber":number|null,"portion_g":number,"portion_description":string}],"confidence":"high"|"medium"|"low","description":string}
If no food is visible, reply {"items":[],"confidence":"low","description":"no food"}."#;

/// Longest provider error body kept in attempt logs.
const MAX_ERROR_BODY: usize = 300;

// ─────────────────────────────────────────────
// HttpRecognizer
// ─────────────────────────────────────────────

/// Remote recognizer speaking the OpenAI chat completions dialect.
pub struct HttpRecognizer {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://openrouter.ai/api/v1"`).
    api_base: String,
    api_key: String,
    /// Extra headers to send with each request (e.g. OpenRouter `HTTP-Referer`).
    extra_headers: HeaderMap,
    display_name: String,
}

impl std::fmt::Debug for HttpRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRecognizer")
            .field("api_base", &self.api_base)
            .field("provider", &self.display_name)
            .finish()
    }
}

impl HttpRecognizer {
    /// Create a recognizer from the remote config and its backend spec.
    ///
    /// API base resolution: config > backend default > standard OpenAI path.
    pub fn new(config: &RemoteConfig, spec: Option<&BackendSpec>) -> anyhow::Result<Self> {
        let api_base = config
            .api_base
            .clone()
            .or_else(|| spec.and_then(|s| s.default_api_base).map(String::from))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    extra_headers.insert(name, val);
                } else {
                    warn!("Invalid header: {}={}", key, value);
                }
            }
        }

        // The orchestrator bounds each call too; this is the transport's own cap.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            api_base,
            api_key: config.api_key.clone(),
            extra_headers,
            display_name: spec
                .map(|s| s.display_name.to_string())
                .unwrap_or_else(|| config.backend.clone()),
        })
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    fn build_request(model: &str, image: &ImageData) -> ChatCompletionRequest {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                Message::system(RECOGNITION_PROMPT),
                Message::user_parts(vec![
                    ContentPart::Text {
                        text: "What food is in this photo?".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{};base64,{}", image.mime_type, encoded),
                            detail: None,
                        },
                    },
                ]),
            ],
            max_tokens: Some(1024),
            temperature: Some(0.2),
        }
    }
}

#[async_trait]
impl RemoteRecognizer for HttpRecognizer {
    async fn recognize(&self, model: &str, image: &ImageData) -> Result<String, ProviderError> {
        debug!(
            provider = %self.display_name,
            model,
            bytes = image.bytes.len(),
            "calling remote model"
        );

        let result = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(&Self::build_request(model, image))
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return Err(ProviderError::Network(format!("request timed out: {}", e)));
            }
            Err(e) => return Err(ProviderError::Network(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(classify_failure(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("failed to read response body: {}", e)))?;

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::Malformed(format!(
                "not a chat completion ({}): {}",
                e,
                truncate_string(&body, MAX_ERROR_BODY)
            ))
        })?;

        parsed
            .into_text()
            .ok_or_else(|| ProviderError::Malformed("completion had no message content".to_string()))
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

// ─────────────────────────────────────────────
// Failure classification
// ─────────────────────────────────────────────

/// Markers of a hard per-day (or billing) cap, as opposed to a per-minute
/// throttle. Matched against the lowercased body.
const DAILY_CAP_MARKERS: &[&str] = &[
    "perday",
    "per day",
    "per-day",
    "daily",
    "insufficient_quota",
    "billing",
];

/// Map a non-success HTTP reply to the failure taxonomy.
///
/// - 429 with daily-cap wording, or 403 mentioning quota → `QuotaExhausted`
/// - other 429 → `RateLimited`
/// - everything else (404 unknown model, 503 overloaded, 5xx, 4xx) → `Unavailable`
pub fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    let lower = body.to_lowercase();
    let detail = format!("{}: {}", status, truncate_string(body.trim(), MAX_ERROR_BODY));
    let daily = DAILY_CAP_MARKERS.iter().any(|m| lower.contains(m));

    match status {
        StatusCode::TOO_MANY_REQUESTS if daily => ProviderError::QuotaExhausted(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        StatusCode::FORBIDDEN if lower.contains("quota") => ProviderError::QuotaExhausted(detail),
        _ => ProviderError::Unavailable(detail),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
