//! Error taxonomy.
//!
//! [`ProviderError`] and [`NormalizationError`] never leave the fallback
//! loop; they are folded into [`AttemptOutcome`](crate::types::AttemptOutcome)
//! records. Only [`RecognitionError`] crosses the public boundary, and only
//! for configuration or programming mistakes.

use thiserror::Error;

use crate::types::AttemptStatus;

/// Classified failure of a single provider call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// The attempt status this failure maps to.
    pub fn status(&self) -> AttemptStatus {
        match self {
            ProviderError::Unavailable(_) => AttemptStatus::Unavailable,
            ProviderError::RateLimited(_) => AttemptStatus::RateLimited,
            ProviderError::QuotaExhausted(_) => AttemptStatus::QuotaExhausted,
            ProviderError::Malformed(_) => AttemptStatus::Malformed,
            ProviderError::Network(_) => AttemptStatus::NetworkError,
        }
    }

    /// The raw provider/transport text without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            ProviderError::Unavailable(s)
            | ProviderError::RateLimited(s)
            | ProviderError::QuotaExhausted(s)
            | ProviderError::Malformed(s)
            | ProviderError::Network(s) => s,
        }
    }
}

/// Failure to map a backend payload into a `RecognitionResult`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("payload contained nothing to recognize")]
    Empty,
}

/// Quota ledger persistence failure. Reads never produce one.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger snapshot could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration or programming error surfaced to the caller.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("provider registry is empty; configure at least one backend")]
    EmptyRegistry,

    #[error("backend '{0}' is registered but has no client wired")]
    MissingClient(String),

    #[error("remote backend '{0}' has no models configured")]
    NoModels(String),

    #[error("failed to read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
