//! Recognition backends for NutriLens.
//!
//! # Architecture
//!
//! - [`traits`]: one trait per backend kind (remote, on-device, in-process)
//! - [`registry`]: static backend specs + the ordered runtime candidate list
//! - [`http_provider::HttpRecognizer`]: OpenAI-compatible remote client with failure classification
//! - [`local_runtime`]: loopback on-device runtime client and disabled stubs
//! - [`probe`]: connectivity probe
//! - [`normalizer`]: maps every backend payload into one result shape
//! - [`nutrition`]: bundled label → nutrition table

pub mod http_provider;
pub mod local_runtime;
pub mod normalizer;
pub mod nutrition;
pub mod probe;
pub mod registry;
pub mod traits;

// Re-export main types for convenience
pub use http_provider::{classify_failure, HttpRecognizer};
pub use local_runtime::{DisabledCaptioner, DisabledOnDevice, LocalRuntimeClassifier};
pub use normalizer::{normalize, RawPayload};
pub use probe::{ConnectivityProbe, HttpProbe, StaticProbe};
pub use registry::{BackendSpec, ProviderRegistry, BACKENDS};
pub use traits::{Captioner, OnDeviceClassifier, Prediction, RemoteRecognizer};
