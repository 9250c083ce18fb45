//! Recognition orchestrator for NutriLens.
//!
//! Composes the provider registry, connectivity probe, quota ledger and
//! normalizer into the single `recognize` entry point.

mod attempts;
pub mod orchestrator;
pub mod status;

#[cfg(test)]
mod testing;

pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use status::RecognitionStatus;
