//! Core types for NutriLens: backends, attempt outcomes, recognition results,
//! and the OpenAI-compatible wire format spoken by the remote backend.
//!
//! Everything a caller sees crosses the boundary as one of these types:
//! the orchestrator returns a [`RecognitionResult`] whether it succeeded
//! or fell through to manual entry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Backends
// ─────────────────────────────────────────────

/// The kind of recognition source a backend represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Hosted endpoint that fans out over several interchangeable models.
    RemoteMultimodel,
    /// Quantized classifier running on the device.
    OnDevice,
    /// Captioning model linked into the process.
    InProcess,
}

impl BackendKind {
    /// Stable kebab-case name used in logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::RemoteMultimodel => "remote-multimodel",
            BackendKind::OnDevice => "on-device",
            BackendKind::InProcess => "in-process",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate backend, as loaded once at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateBackend {
    /// Stable identifier (also the ledger key).
    pub id: String,
    pub kind: BackendKind,
    /// Ordered model identifiers. Empty for local backends.
    #[serde(default)]
    pub models: Vec<String>,
    /// Whether an attempt needs network connectivity.
    pub network_required: bool,
}

impl CandidateBackend {
    /// Build a remote multi-model backend.
    pub fn remote(id: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            id: id.into(),
            kind: BackendKind::RemoteMultimodel,
            models,
            network_required: true,
        }
    }

    /// Build a local (model-less, offline) backend.
    pub fn local(id: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            kind,
            models: Vec::new(),
            network_required: false,
        }
    }
}

// ─────────────────────────────────────────────
// Attempt outcomes
// ─────────────────────────────────────────────

/// Classified status of a single attempt against one backend/model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    Success,
    Unavailable,
    RateLimited,
    QuotaExhausted,
    Malformed,
    NetworkError,
}

impl AttemptStatus {
    /// Whether this outcome consumed provider capacity and must be charged
    /// to the quota ledger.
    ///
    /// Transport failures and "model unavailable" replies are free; any
    /// other provider reply is charged.
    pub fn is_charged(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Success
                | AttemptStatus::RateLimited
                | AttemptStatus::QuotaExhausted
                | AttemptStatus::Malformed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Unavailable => "unavailable",
            AttemptStatus::RateLimited => "rate-limited",
            AttemptStatus::QuotaExhausted => "quota-exhausted",
            AttemptStatus::Malformed => "malformed",
            AttemptStatus::NetworkError => "network-error",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one attempt, kept in the order attempts were made.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub backend_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub status: AttemptStatus,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    /// Raw error text from the provider or transport (empty on success).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ─────────────────────────────────────────────
// Recognition results
// ─────────────────────────────────────────────

/// Coarse confidence bucket shared by every backend kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    /// Bucket a percentage score (0–100): ≥70 high, ≥50 medium, else low.
    pub fn from_percent(score: f64) -> Self {
        if score >= 70.0 {
            Confidence::High
        } else if score >= 50.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    /// Lenient parse of a provider-supplied label. Unknown labels map to `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" | "moderate" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One identified food with its nutrition for the stated portion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecognitionItem {
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber: Option<f64>,
    pub portion_grams: f64,
    pub portion_description: String,
}

/// Aggregate nutrition across all items of a result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub sugar: f64,
    pub fiber: f64,
}

impl NutritionTotals {
    /// Sum the nutrition of `items`, rounded to one decimal place.
    pub fn from_items(items: &[RecognitionItem]) -> Self {
        let mut totals = items.iter().fold(NutritionTotals::default(), |mut acc, item| {
            acc.calories += item.calories;
            acc.protein += item.protein;
            acc.carbs += item.carbs;
            acc.fat += item.fat;
            acc.sugar += item.sugar.unwrap_or(0.0);
            acc.fiber += item.fiber.unwrap_or(0.0);
            acc
        });
        totals.calories = round1(totals.calories);
        totals.protein = round1(totals.protein);
        totals.carbs = round1(totals.carbs);
        totals.fat = round1(totals.fat);
        totals.sugar = round1(totals.sugar);
        totals.fiber = round1(totals.fiber);
        totals
    }
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// The single result shape returned to callers.
///
/// A terminal-manual result has no items, low confidence, no backend and a
/// non-empty `explanation`; see [`RecognitionResult::manual`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub items: Vec<RecognitionItem>,
    pub totals: NutritionTotals,
    pub confidence: Confidence,
    pub description: String,
    pub is_multi_item: bool,
    /// Backend that produced the result (`None` on terminal-manual).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
    /// Why recognition fell through to manual entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Soft quota/rate note carried forward from earlier attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Every attempt made for this call, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptOutcome>,
}

impl RecognitionResult {
    /// Build a successful result from normalized items. Totals are always
    /// derived from the items.
    pub fn from_items(
        items: Vec<RecognitionItem>,
        confidence: Confidence,
        description: impl Into<String>,
    ) -> Self {
        let totals = NutritionTotals::from_items(&items);
        let is_multi_item = items.len() > 1;
        Self {
            items,
            totals,
            confidence,
            description: description.into(),
            is_multi_item,
            backend_id: None,
            explanation: None,
            warning: None,
            attempts: Vec::new(),
        }
    }

    /// The terminal "please enter it manually" result.
    pub fn manual(explanation: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            totals: NutritionTotals::default(),
            confidence: Confidence::Low,
            description: String::new(),
            is_multi_item: false,
            backend_id: None,
            explanation: Some(explanation.into()),
            warning: None,
            attempts: Vec::new(),
        }
    }

    /// Whether this is the terminal-manual outcome.
    pub fn is_manual(&self) -> bool {
        self.items.is_empty() && self.explanation.is_some()
    }

    /// Tag the result with the backend that produced it.
    pub fn with_backend(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = Some(backend_id.into());
        self
    }
}

// ─────────────────────────────────────────────
// Images
// ─────────────────────────────────────────────

/// Opaque reference to a captured image on local storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    path: PathBuf,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the image bytes.
    pub async fn load(&self) -> std::io::Result<ImageData> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(ImageData::new(self.path.clone(), bytes))
    }
}

/// Loaded image bytes plus the MIME type guessed from the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageData {
    pub fn new(path: PathBuf, bytes: Vec<u8>) -> Self {
        let mime_type = guess_image_mime(&path).to_string();
        Self {
            path,
            bytes,
            mime_type,
        }
    }
}

/// Guess an image MIME type from a file extension (defaults to JPEG).
pub fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => "image/jpeg",
    }
}

// ─────────────────────────────────────────────
// Wire format (OpenAI-compatible chat completions)
// ─────────────────────────────────────────────

/// A chat message in the OpenAI format.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: MessageContent },
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a user message with multipart content (text + images).
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Message::User {
            content: MessageContent::Parts(parts),
        }
    }
}

/// User message content: either plain text or multipart (for vision/images).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single part of a multipart message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    /// Image URL part (a URL or base64 data URI).
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Request body for an OpenAI-compatible chat completion API.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Raw chat completion response. Used internally for deserialization.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if any.
    pub fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
