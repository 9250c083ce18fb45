//! Pre-flight status for UI hints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use nutrilens_core::types::BackendKind;

use crate::orchestrator::Orchestrator;

/// Which backend a recognition call would most likely use right now.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionStatus {
    pub online: bool,
    /// Remote backend registered, reachable and within its caps.
    pub remote_available: bool,
    pub remote_remaining: Option<u32>,
    pub remote_limit: Option<u32>,
    pub remote_reset_at: Option<DateTime<Utc>>,
    /// Why the remote backend is blocked, if it is.
    pub remote_blocked_reason: Option<String>,
    pub on_device_available: bool,
    pub in_process_available: bool,
    /// Id of the first backend expected to be tried, `None` for manual entry.
    pub recommended_backend: Option<String>,
}

impl Orchestrator {
    /// Probe every backend without charging anything.
    pub async fn get_status(&self) -> RecognitionStatus {
        let online = self.probe.is_online().await;

        let remote = self.registry.first_of(BackendKind::RemoteMultimodel);
        let check = remote.map(|b| self.ledger.is_within_limits(&b.id));
        let remote_available = online
            && remote.is_some_and(|b| self.remote_ready(&b.id))
            && check.as_ref().is_some_and(|c| c.allowed);

        let on_device = self.registry.first_of(BackendKind::OnDevice);
        let on_device_available = match on_device {
            Some(_) => self.on_device.is_available().await,
            None => false,
        };
        let in_process = self.registry.first_of(BackendKind::InProcess);
        let in_process_available = match in_process {
            Some(_) => self.captioner.is_ready().await,
            None => false,
        };

        let recommended_backend = [
            (remote, remote_available),
            (on_device, on_device_available),
            (in_process, in_process_available),
        ]
        .into_iter()
        .find_map(|(backend, available)| backend.filter(|_| available).map(|b| b.id.clone()));

        RecognitionStatus {
            online,
            remote_available,
            remote_remaining: check.as_ref().and_then(|c| c.remaining),
            remote_limit: check.as_ref().and_then(|c| c.limit),
            remote_reset_at: check.as_ref().and_then(|c| c.reset_at),
            remote_blocked_reason: check.and_then(|c| c.reason),
            on_device_available,
            in_process_available,
            recommended_backend,
        }
    }
}
