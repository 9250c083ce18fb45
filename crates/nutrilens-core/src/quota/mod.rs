//! Quota ledger: per-backend day/month call counters with best-effort
//! persistence.
//!
//! # Usage
//! ```no_run
//! use std::sync::Arc;
//! use nutrilens_core::quota::{LedgerSettings, QuotaLedger, QuotaLimits, SystemClock};
//! use nutrilens_core::store::MemoryStore;
//!
//! let settings = LedgerSettings::default().with_limits("gemini", QuotaLimits::new(50, 1500));
//! let ledger = QuotaLedger::load(Arc::new(MemoryStore::new()), settings, Arc::new(SystemClock));
//! ledger.record_attempt("gemini", true);
//! assert!(ledger.is_within_limits("gemini").allowed);
//! ```

pub mod flusher;
pub mod ledger;

use std::sync::Mutex;

use chrono::{DateTime, Utc};

pub use flusher::LedgerFlusher;
pub use ledger::{
    ArchivedBucket, BackendReport, LedgerSettings, QuotaAdvisory, QuotaCheck, QuotaLedger,
    QuotaLimits, QuotaPeriod, QuotaRecord, QuotaReport, Reservation, LEDGER_STORE_KEY,
};

/// Source of "now" for period keys.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to cross period boundaries
/// deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
