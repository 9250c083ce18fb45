//! Backend traits: one per backend kind.
//!
//! Each trait carries a capability query so a build without the runtime can
//! wire a disabled stub instead (see [`crate::local_runtime`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nutrilens_core::types::ImageData;
use nutrilens_core::ProviderError;

/// A hosted endpoint that serves several interchangeable vision models.
#[async_trait]
pub trait RemoteRecognizer: Send + Sync {
    /// Ask one model to describe the image.
    ///
    /// # Returns
    /// The model's raw text reply. Failures are already classified into the
    /// [`ProviderError`] taxonomy; normalization happens in the caller.
    async fn recognize(&self, model: &str, image: &ImageData) -> Result<String, ProviderError>;

    /// Whether credentials are present.
    fn is_configured(&self) -> bool;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}

/// Top prediction of an image classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// Percentage, 0–100.
    pub confidence: f64,
}

/// Quantized classifier running on the device.
#[async_trait]
pub trait OnDeviceClassifier: Send + Sync {
    /// Whether the model is loaded and ready to classify.
    async fn is_available(&self) -> bool;

    async fn classify(&self, image: &ImageData) -> anyhow::Result<Prediction>;

    fn display_name(&self) -> &str;
}

/// Captioning model linked into the process.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Whether the model is ready to caption.
    async fn is_ready(&self) -> bool;

    async fn caption(&self, image: &ImageData) -> anyhow::Result<String>;

    fn display_name(&self) -> &str;
}
