//! The ledger itself: bucket bookkeeping, limit checks, advisories and
//! snapshot persistence.
//!
//! # Snapshot format
//!
//! One JSON document under [`LEDGER_STORE_KEY`]:
//! `{"version":1,"savedAt":"...","backends":{"<id>":{"day":{...},"month":{...},...}}}`.
//! Timestamps are RFC 3339 so reset boundaries survive a restart exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Clock;
use crate::config::schema::QuotaConfig;
use crate::error::LedgerError;
use crate::store::KeyValueStore;
use crate::utils;

/// Key under which the snapshot is stored.
pub const LEDGER_STORE_KEY: &str = "quota_ledger";

const SNAPSHOT_VERSION: u32 = 1;

/// Archived month buckets kept per backend.
const MONTH_HISTORY_LEN: usize = 12;

// ─────────────────────────────────────────────
// Periods, limits, settings
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPeriod {
    Day,
    Month,
}

impl QuotaPeriod {
    /// Period key for `now`: `YYYY-MM-DD` or `YYYY-MM`.
    pub fn key(&self, now: DateTime<Utc>) -> String {
        match self {
            QuotaPeriod::Day => utils::day_key(now),
            QuotaPeriod::Month => utils::month_key(now),
        }
    }

    /// When the period containing `now` ends.
    pub fn reset_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            QuotaPeriod::Day => utils::next_day_start(now),
            QuotaPeriod::Month => utils::next_month_start(now),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaPeriod::Day => "daily",
            QuotaPeriod::Month => "monthly",
        }
    }
}

/// Caps for one backend. `None` means uncapped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub daily: Option<u32>,
    pub monthly: Option<u32>,
}

impl QuotaLimits {
    /// Caps for both periods. A zero cap is treated as uncapped.
    pub fn new(daily: u32, monthly: u32) -> Self {
        Self {
            daily: (daily > 0).then_some(daily),
            monthly: (monthly > 0).then_some(monthly),
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Ledger tuning, fixed at construction.
#[derive(Clone, Debug)]
pub struct LedgerSettings {
    /// Caps per backend id. Backends not listed are uncapped.
    pub limits: HashMap<String, QuotaLimits>,
    /// Fraction of a cap at which a one-time advisory fires.
    pub warn_ratio: f64,
    /// Archived day buckets kept per backend.
    pub history_days: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            limits: HashMap::new(),
            warn_ratio: 0.8,
            history_days: 30,
        }
    }
}

impl LedgerSettings {
    pub fn with_limits(mut self, backend_id: impl Into<String>, limits: QuotaLimits) -> Self {
        self.limits.insert(backend_id.into(), limits);
        self
    }

    /// Settings for a single capped backend, taken from the `quota` config section.
    pub fn from_config(backend_id: impl Into<String>, config: &QuotaConfig) -> Self {
        Self {
            limits: HashMap::new(),
            warn_ratio: config.warn_ratio,
            history_days: config.history_days,
        }
        .with_limits(backend_id, QuotaLimits::new(config.daily_limit, config.monthly_limit))
    }

    fn limits_for(&self, backend_id: &str) -> QuotaLimits {
        self.limits.get(backend_id).copied().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────

/// One active counter bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    pub backend_id: String,
    pub period: QuotaPeriod,
    pub period_key: String,
    /// Charged calls within `period_key`.
    pub count: u32,
    /// Of those, calls that produced a recognized result.
    #[serde(default)]
    pub successes: u32,
    pub limit: Option<u32>,
    pub reset_at: DateTime<Utc>,
}

impl QuotaRecord {
    fn fresh(backend_id: &str, period: QuotaPeriod, now: DateTime<Utc>, limit: Option<u32>) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            period,
            period_key: period.key(now),
            count: 0,
            successes: 0,
            limit,
            reset_at: period.reset_after(now),
        }
    }

    fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.period_key == self.period.key(now)
    }

    /// Whether the cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted_with(0)
    }

    /// Calls left before the cap (`None` when uncapped).
    pub fn remaining(&self) -> Option<u32> {
        self.remaining_with(0)
    }

    fn exhausted_with(&self, pending: u32) -> bool {
        self.limit
            .is_some_and(|limit| self.count.saturating_add(pending) >= limit)
    }

    fn remaining_with(&self, pending: u32) -> Option<u32> {
        self.limit
            .map(|limit| limit.saturating_sub(self.count.saturating_add(pending)))
    }
}

/// A closed bucket kept for reporting only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedBucket {
    pub period_key: String,
    pub count: u32,
    pub successes: u32,
}

impl From<&QuotaRecord> for ArchivedBucket {
    fn from(record: &QuotaRecord) -> Self {
        Self {
            period_key: record.period_key.clone(),
            count: record.count,
            successes: record.successes,
        }
    }
}

/// Everything the ledger knows about one backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendUsage {
    day: QuotaRecord,
    month: QuotaRecord,
    #[serde(default)]
    day_history: Vec<ArchivedBucket>,
    #[serde(default)]
    month_history: Vec<ArchivedBucket>,
    /// Advisory tags already fired, `"<kind>:<period-key>"`.
    #[serde(default)]
    warned: Vec<String>,
    /// Day key on which the provider itself reported its daily cap.
    #[serde(default)]
    exhausted_on: Option<String>,
}

impl BackendUsage {
    fn new(backend_id: &str, now: DateTime<Utc>, limits: QuotaLimits) -> Self {
        Self {
            day: QuotaRecord::fresh(backend_id, QuotaPeriod::Day, now, limits.daily),
            month: QuotaRecord::fresh(backend_id, QuotaPeriod::Month, now, limits.monthly),
            day_history: Vec::new(),
            month_history: Vec::new(),
            warned: Vec::new(),
            exhausted_on: None,
        }
    }

    /// Archive buckets whose key no longer matches `now` and start fresh
    /// ones. Returns whether anything changed.
    fn roll(&mut self, now: DateTime<Utc>, limits: QuotaLimits, history_days: usize) -> bool {
        let mut changed = false;

        if !self.day.is_current(now) {
            if self.day.count > 0 {
                self.day_history.push(ArchivedBucket::from(&self.day));
                let excess = self.day_history.len().saturating_sub(history_days);
                self.day_history.drain(..excess);
            }
            self.day = QuotaRecord::fresh(&self.day.backend_id, QuotaPeriod::Day, now, limits.daily);
            changed = true;
        }

        if !self.month.is_current(now) {
            if self.month.count > 0 {
                self.month_history.push(ArchivedBucket::from(&self.month));
                let excess = self.month_history.len().saturating_sub(MONTH_HISTORY_LEN);
                self.month_history.drain(..excess);
            }
            self.month =
                QuotaRecord::fresh(&self.month.backend_id, QuotaPeriod::Month, now, limits.monthly);
            changed = true;
        }

        if changed {
            let day_key = self.day.period_key.clone();
            let month_key = self.month.period_key.clone();
            self.warned
                .retain(|tag| tag.ends_with(&format!(":{day_key}")) || tag.ends_with(&format!(":{month_key}")));
            if self.exhausted_on.as_deref() != Some(day_key.as_str()) {
                self.exhausted_on = None;
            }
        }

        // Caps come from config, which may have changed since the snapshot.
        self.day.limit = limits.daily;
        self.month.limit = limits.monthly;
        changed
    }

    fn exhausted_today(&self) -> bool {
        self.exhausted_on.as_deref() == Some(self.day.period_key.as_str())
    }

    /// Limit check counting `pending` reserved calls as already charged.
    fn check(&self, pending: u32) -> QuotaCheck {
        let remaining = match (self.day.remaining_with(pending), self.month.remaining_with(pending)) {
            (Some(d), Some(m)) => Some(d.min(m)),
            (d, m) => d.or(m),
        };

        if self.exhausted_today() {
            return QuotaCheck {
                allowed: false,
                remaining: Some(0),
                limit: self.day.limit,
                reset_at: Some(self.day.reset_at),
                reason: Some(format!(
                    "{} reported its daily quota exhausted; resets at {}",
                    self.day.backend_id,
                    format_reset(self.day.reset_at)
                )),
            };
        }

        for record in [&self.month, &self.day] {
            if record.exhausted_with(pending) {
                return QuotaCheck {
                    allowed: false,
                    remaining: Some(0),
                    limit: self.day.limit,
                    reset_at: Some(record.reset_at),
                    reason: Some(format!(
                        "{} {} limit of {} reached; resets at {}",
                        record.backend_id,
                        record.period.as_str(),
                        record.limit.unwrap_or_default(),
                        format_reset(record.reset_at)
                    )),
                };
            }
        }

        let reset_at = if self.day.limit.is_some() {
            Some(self.day.reset_at)
        } else if self.month.limit.is_some() {
            Some(self.month.reset_at)
        } else {
            None
        };

        QuotaCheck {
            allowed: true,
            remaining,
            limit: self.day.limit,
            reset_at,
            reason: None,
        }
    }
}

fn format_reset(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

// ─────────────────────────────────────────────
// Public answers
// ─────────────────────────────────────────────

/// Answer to "may this backend be called now?".
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCheck {
    pub allowed: bool,
    /// Calls left before the tightest cap (`None` when uncapped).
    pub remaining: Option<u32>,
    /// The daily cap, if any.
    pub limit: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
    /// Human-readable reason when `allowed` is false.
    pub reason: Option<String>,
}

/// One-time advisory fired when a bucket crosses the warn ratio or its cap.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaAdvisory {
    pub backend_id: String,
    pub period: QuotaPeriod,
    pub count: u32,
    pub limit: u32,
    pub message: String,
}

/// Per-backend section of [`QuotaReport`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReport {
    pub backend_id: String,
    pub day: QuotaRecord,
    pub month: QuotaRecord,
    pub exhausted_today: bool,
    pub day_history: Vec<ArchivedBucket>,
    pub month_history: Vec<ArchivedBucket>,
}

/// Snapshot of every known backend's usage.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaReport {
    pub generated_at: DateTime<Utc>,
    pub backends: Vec<BackendReport>,
}

impl QuotaReport {
    pub fn backend(&self, backend_id: &str) -> Option<&BackendReport> {
        self.backends.iter().find(|b| b.backend_id == backend_id)
    }
}

// ─────────────────────────────────────────────
// QuotaLedger
// ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    backends: BTreeMap<String, BackendUsage>,
}

#[derive(Default)]
struct LedgerState {
    backends: BTreeMap<String, BackendUsage>,
    /// Reserved but not yet settled calls per backend. Never persisted.
    in_flight: HashMap<String, u32>,
    dirty: bool,
}

/// A call slot held against a backend's caps while the call is in flight.
///
/// [`Reservation::commit`] charges it. Dropping it uncommitted (an uncharged
/// outcome or a cancelled call) gives the slot back.
#[must_use = "dropping a reservation releases it uncharged"]
#[derive(Debug)]
pub struct Reservation<'a> {
    ledger: &'a QuotaLedger,
    backend_id: String,
    settled: bool,
}

impl Reservation<'_> {
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Charge the reserved call. Returns the advisory it fired, if any.
    pub fn commit(mut self, succeeded: bool) -> Option<QuotaAdvisory> {
        self.settled = true;
        self.ledger.settle(&self.backend_id, Some(succeeded))
    }

    /// Give the slot back without charging.
    pub fn release(self) {}
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.settle(&self.backend_id, None);
        }
    }
}

/// Per-backend call counters shared by every concurrent recognition call.
///
/// All mutations go through one mutex, so concurrent increments are never
/// lost. Reads never fail.
pub struct QuotaLedger {
    store: Arc<dyn KeyValueStore>,
    settings: LedgerSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("settings", &self.settings)
            .finish()
    }
}

impl QuotaLedger {
    /// Load the ledger from `store`.
    ///
    /// A missing, corrupt or unknown-version snapshot starts from zero.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        settings: LedgerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let backends = match store.get(LEDGER_STORE_KEY) {
            None => {
                debug!("No quota ledger snapshot found, starting empty");
                BTreeMap::new()
            }
            Some(raw) => match serde_json::from_str::<LedgerSnapshot>(&raw) {
                Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
                    info!(
                        backends = snapshot.backends.len(),
                        saved_at = %snapshot.saved_at,
                        "loaded quota ledger"
                    );
                    snapshot.backends
                }
                Ok(snapshot) => {
                    warn!(
                        version = snapshot.version,
                        "Unsupported quota ledger version, starting empty"
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!("Failed to parse quota ledger snapshot, starting empty: {}", e);
                    BTreeMap::new()
                }
            },
        };

        Self {
            store,
            settings,
            clock,
            state: Mutex::new(LedgerState {
                backends,
                in_flight: HashMap::new(),
                dirty: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Charge one call to `backend_id`.
    ///
    /// Rolls stale buckets first, so the first call of a new period counts
    /// as 1. Returns the most severe advisory fired by this call, if any.
    pub fn record_attempt(&self, backend_id: &str, succeeded: bool) -> Option<QuotaAdvisory> {
        let mut state = self.lock();
        self.charge(&mut state, backend_id, succeeded)
    }

    /// Check the caps and hold one call slot in a single step.
    ///
    /// Slots held by other in-flight calls count as used, so concurrent
    /// callers can never overshoot a cap. `Err` carries the blocking check.
    pub fn try_reserve(&self, backend_id: &str) -> Result<Reservation<'_>, QuotaCheck> {
        let now = self.clock.now();
        let limits = self.settings.limits_for(backend_id);
        let mut guard = self.lock();
        let state = &mut *guard;

        let pending = state.in_flight.get(backend_id).copied().unwrap_or(0);
        let check = match state.backends.get_mut(backend_id) {
            Some(usage) => {
                if usage.roll(now, limits, self.settings.history_days) {
                    state.dirty = true;
                }
                usage.check(pending)
            }
            None => BackendUsage::new(backend_id, now, limits).check(pending),
        };
        if !check.allowed {
            return Err(check);
        }

        *state.in_flight.entry(backend_id.to_string()).or_insert(0) += 1;
        debug!(backend = backend_id, in_flight = pending + 1, "quota slot reserved");
        Ok(Reservation {
            ledger: self,
            backend_id: backend_id.to_string(),
            settled: false,
        })
    }

    /// Free one reserved slot, charging it when `charge` is set.
    fn settle(&self, backend_id: &str, charge: Option<bool>) -> Option<QuotaAdvisory> {
        let mut state = self.lock();
        let drained = match state.in_flight.get_mut(backend_id) {
            Some(pending) => {
                *pending = pending.saturating_sub(1);
                *pending == 0
            }
            None => false,
        };
        if drained {
            state.in_flight.remove(backend_id);
        }
        match charge {
            Some(succeeded) => self.charge(&mut state, backend_id, succeeded),
            None => {
                debug!(backend = backend_id, "quota slot released uncharged");
                None
            }
        }
    }

    fn charge(&self, state: &mut LedgerState, backend_id: &str, succeeded: bool) -> Option<QuotaAdvisory> {
        let now = self.clock.now();
        let limits = self.settings.limits_for(backend_id);
        state.dirty = true;

        let usage = state
            .backends
            .entry(backend_id.to_string())
            .or_insert_with(|| BackendUsage::new(backend_id, now, limits));
        usage.roll(now, limits, self.settings.history_days);

        for record in [&mut usage.day, &mut usage.month] {
            record.count = record.count.saturating_add(1);
            if succeeded {
                record.successes = record.successes.saturating_add(1);
            }
        }

        debug!(
            backend = backend_id,
            succeeded,
            day_count = usage.day.count,
            month_count = usage.month.count,
            "quota charged"
        );

        let mut fired = None;
        for period in [QuotaPeriod::Month, QuotaPeriod::Day] {
            if let Some(advisory) = self.advise(usage, period) {
                warn!(
                    backend = backend_id,
                    period = period.as_str(),
                    count = advisory.count,
                    limit = advisory.limit,
                    "{}",
                    advisory.message
                );
                fired = Some(advisory);
            }
        }
        fired
    }

    /// Fire the warn-ratio or cap advisory for one bucket, once per key.
    fn advise(&self, usage: &mut BackendUsage, period: QuotaPeriod) -> Option<QuotaAdvisory> {
        let record = match period {
            QuotaPeriod::Day => &usage.day,
            QuotaPeriod::Month => &usage.month,
        };
        let limit = record.limit?;

        let (tag, message) = if record.count >= limit {
            (
                format!("limit-{}:{}", period.as_str(), record.period_key),
                format!(
                    "{} reached its {} limit of {} recognitions; resets at {}",
                    record.backend_id,
                    period.as_str(),
                    limit,
                    format_reset(record.reset_at)
                ),
            )
        } else if f64::from(record.count) >= self.settings.warn_ratio * f64::from(limit) {
            (
                format!("warn-{}:{}", period.as_str(), record.period_key),
                format!(
                    "{} has used {} of {} {} recognitions",
                    record.backend_id,
                    record.count,
                    limit,
                    period.as_str()
                ),
            )
        } else {
            return None;
        };

        if usage.warned.contains(&tag) {
            return None;
        }
        let advisory = QuotaAdvisory {
            backend_id: record.backend_id.clone(),
            period,
            count: record.count,
            limit,
            message,
        };
        usage.warned.push(tag);
        Some(advisory)
    }

    /// Block `backend_id` for the rest of the current day because the
    /// provider reported a hard daily cap. Counts are left untouched.
    pub fn mark_exhausted(&self, backend_id: &str) {
        let now = self.clock.now();
        let limits = self.settings.limits_for(backend_id);
        let mut state = self.lock();
        state.dirty = true;

        let usage = state
            .backends
            .entry(backend_id.to_string())
            .or_insert_with(|| BackendUsage::new(backend_id, now, limits));
        usage.roll(now, limits, self.settings.history_days);
        usage.exhausted_on = Some(usage.day.period_key.clone());
        warn!(backend = backend_id, day = %usage.day.period_key, "backend blocked until next day");
    }

    /// Whether `backend_id` may be called now. Never mutates state.
    ///
    /// Counts settled calls only; use [`QuotaLedger::try_reserve`] right
    /// before a call.
    pub fn is_within_limits(&self, backend_id: &str) -> QuotaCheck {
        self.current_usage(backend_id).check(0)
    }

    /// Usage of every configured or previously charged backend.
    pub fn report(&self) -> QuotaReport {
        let ids: BTreeSet<String> = {
            let state = self.lock();
            state
                .backends
                .keys()
                .cloned()
                .chain(self.settings.limits.keys().cloned())
                .collect()
        };

        let backends = ids
            .iter()
            .map(|id| {
                let usage = self.current_usage(id);
                BackendReport {
                    backend_id: id.clone(),
                    exhausted_today: usage.exhausted_today(),
                    day: usage.day,
                    month: usage.month,
                    day_history: usage.day_history,
                    month_history: usage.month_history,
                }
            })
            .collect();

        QuotaReport {
            generated_at: self.clock.now(),
            backends,
        }
    }

    /// A rolled copy of the backend's usage as of now.
    fn current_usage(&self, backend_id: &str) -> BackendUsage {
        let now = self.clock.now();
        let limits = self.settings.limits_for(backend_id);
        let state = self.lock();
        let mut usage = state
            .backends
            .get(backend_id)
            .cloned()
            .unwrap_or_else(|| BackendUsage::new(backend_id, now, limits));
        drop(state);
        usage.roll(now, limits, self.settings.history_days);
        usage
    }

    /// Whether there are unflushed changes.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Persist the snapshot if anything changed since the last flush.
    ///
    /// Returns `Ok(true)` when a write happened.
    pub fn flush(&self) -> Result<bool, LedgerError> {
        let json = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(false);
            }
            let snapshot = LedgerSnapshot {
                version: SNAPSHOT_VERSION,
                saved_at: self.clock.now(),
                backends: state.backends.clone(),
            };
            let json = serde_json::to_string_pretty(&snapshot)?;
            state.dirty = false;
            json
        };

        if let Err(e) = self.store.set(LEDGER_STORE_KEY, &json) {
            self.lock().dirty = true;
            return Err(e.into());
        }
        debug!(bytes = json.len(), "quota ledger flushed");
        Ok(true)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
