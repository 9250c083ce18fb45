//! NutriLens core: shared types, configuration, key-value persistence and
//! the quota ledger.
//!
//! # Architecture
//!
//! - [`types`]: backends, attempt outcomes, recognition results, wire format
//! - [`error`]: provider/normalization/ledger/recognition error taxonomy
//! - [`config`]: JSON config with env var overrides
//! - [`store`]: `KeyValueStore` trait with file and memory implementations
//! - [`quota`]: per-backend day/month counters and the background flusher

pub mod config;
pub mod error;
pub mod quota;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{LedgerError, NormalizationError, ProviderError, RecognitionError};
