//! Connectivity probe.
//!
//! Queried afresh on every recognition call. Any probe failure reads as
//! offline so the orchestrator goes straight to local backends instead of
//! waiting out a doomed remote timeout.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use nutrilens_core::config::schema::ProbeConfig;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// `HEAD` request against a well-known URL. Any HTTP response counts as
/// online, even an error status.
pub struct HttpProbe {
    client: Option<reqwest::Client>,
    url: String,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| debug!(error = %e, "probe client could not be built"))
            .ok();
        Self {
            client,
            url: config.url.clone(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        match client.head(&self.url).send().await {
            Ok(resp) => {
                debug!(status = %resp.status(), "connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "connectivity probe failed, assuming offline");
                false
            }
        }
    }
}

/// Fixed answer, for forced-offline mode and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    online: bool,
}

impl StaticProbe {
    pub fn online() -> Self {
        Self { online: true }
    }

    pub fn offline() -> Self {
        Self { online: false }
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.online
    }
}
