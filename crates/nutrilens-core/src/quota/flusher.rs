//! Background flusher: writes the ledger snapshot at a bounded cadence and
//! once more on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::QuotaLedger;

/// Default interval: 30 seconds.
pub const DEFAULT_FLUSH_INTERVAL_S: u64 = 30;

/// Periodically persists a [`QuotaLedger`].
pub struct LedgerFlusher {
    ledger: Arc<QuotaLedger>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl LedgerFlusher {
    pub fn new(ledger: Arc<QuotaLedger>, interval_s: Option<u64>) -> Self {
        Self {
            ledger,
            interval: Duration::from_secs(interval_s.unwrap_or(DEFAULT_FLUSH_INTERVAL_S).max(1)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run the flush loop. Returns after `stop()`, having flushed one last time.
    pub async fn start(&self) {
        info!(interval_s = self.interval.as_secs(), "ledger flusher started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.tick();
                }
                _ = self.shutdown.notified() => {
                    debug!("ledger flusher shutting down");
                    self.tick();
                    return;
                }
            }
        }
    }

    /// Signal the loop to flush and exit. Safe to call before `start()` runs.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    fn tick(&self) {
        match self.ledger.flush() {
            Ok(true) => debug!("ledger flushed"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "ledger flush failed, will retry next tick"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
