//! Per-call attempt log.
//!
//! Collects every [`AttemptOutcome`] of one recognition call and the notes
//! needed to explain a manual fallback or warn about a degraded success.

use std::time::Duration;

use tracing::{info, warn};

use nutrilens_core::types::{AttemptOutcome, AttemptStatus, RecognitionResult};

const MANUAL_SUFFIX: &str = "Please enter the food manually.";

#[derive(Debug, Default)]
pub(crate) struct AttemptLog {
    attempts: Vec<AttemptOutcome>,
    /// Hard cap: local ledger block or provider-reported daily exhaustion.
    quota: Option<String>,
    /// Soft throttle from a provider.
    rate: Option<String>,
    /// Transport failure or offline device.
    network: Option<String>,
    /// Soft note carried onto a successful result.
    warning: Option<String>,
}

impl AttemptLog {
    /// Log and keep one attempt. Called before the next candidate is tried.
    pub(crate) fn record(
        &mut self,
        backend_id: &str,
        model: Option<&str>,
        status: AttemptStatus,
        latency: Duration,
        error: impl Into<String>,
    ) {
        let outcome = AttemptOutcome {
            backend_id: backend_id.to_string(),
            model: model.map(String::from),
            status,
            latency,
            error: error.into(),
        };
        let latency_ms = outcome.latency.as_millis() as u64;

        if outcome.status == AttemptStatus::Success {
            info!(
                backend = %outcome.backend_id,
                model = outcome.model.as_deref().unwrap_or("-"),
                status = %outcome.status,
                latency_ms,
                "recognition attempt succeeded"
            );
        } else {
            warn!(
                backend = %outcome.backend_id,
                model = outcome.model.as_deref().unwrap_or("-"),
                status = %outcome.status,
                latency_ms,
                error = %outcome.error,
                "recognition attempt failed"
            );
        }

        self.attempts.push(outcome);
    }

    pub(crate) fn note_quota(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.warning = Some(message.clone());
        self.quota = Some(message);
    }

    pub(crate) fn note_rate_limit(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.warning.is_none() {
            self.warning = Some(message.clone());
        }
        self.rate = Some(message);
    }

    pub(crate) fn note_network(&mut self, message: impl Into<String>) {
        self.network = Some(message.into());
    }

    /// Advisory from the ledger (approaching or reaching a cap).
    pub(crate) fn note_advisory(&mut self, message: impl Into<String>) {
        if self.warning.is_none() {
            self.warning = Some(message.into());
        }
    }

    pub(crate) fn charged_remote_calls(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.model.is_some() && a.status.is_charged())
            .count()
    }

    /// Finish with a success: attach the attempts and any soft warning.
    pub(crate) fn succeed(self, mut result: RecognitionResult) -> RecognitionResult {
        result.warning = self.warning;
        result.attempts = self.attempts;
        result
    }

    /// Finish with the terminal manual result.
    ///
    /// Explanation priority: quota > network > generic. A rate-limit note
    /// only refines the generic text.
    pub(crate) fn manual(self) -> RecognitionResult {
        let explanation = if let Some(quota) = &self.quota {
            format!("Online recognition is unavailable: {}. {}", quota, MANUAL_SUFFIX)
        } else if let Some(network) = &self.network {
            format!("Could not reach the recognition service ({}). {}", network, MANUAL_SUFFIX)
        } else if let Some(rate) = &self.rate {
            format!("Online recognition is busy right now ({}). {}", rate, MANUAL_SUFFIX)
        } else {
            format!("Could not identify the food. {}", MANUAL_SUFFIX)
        };

        let mut result = RecognitionResult::manual(explanation);
        result.attempts = self.attempts;
        result
    }
}
