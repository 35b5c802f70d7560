//! Shared Application State
//!
//! Thread-safe state for the period cursor, per-period progress and sync status.

use dashmap::DashMap;
use parking_lot::RwLock;
use relay_proof::{ChainRelayUpdate, ProofCheck};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Progress of one period's update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Waiting for the beacon node to publish the period
    Waiting,
    /// Update assembled and self-verified
    Assembled,
    /// Transaction confirmed
    Confirmed,
    /// Assembly or submission failed
    Failed,
}

/// Record for a tracked period
#[derive(Debug, Clone, Serialize)]
pub struct PeriodRecord {
    pub period: u64,
    pub status: UpdateStatus,
    /// Latest (finalizing) slot of the assembled update
    pub latest_slot: Option<u64>,
    pub finalized_slot: Option<u64>,
    /// Committee members that signed
    pub participants: Option<usize>,
    /// Self-checks made during assembly
    pub checks: Vec<ProofCheck>,
    /// Transaction hash once confirmed
    pub tx_hash: Option<String>,
    /// Error message if failed
    pub error: Option<String>,
}

impl PeriodRecord {
    fn new(period: u64, status: UpdateStatus) -> Self {
        Self {
            period,
            status,
            latest_slot: None,
            finalized_slot: None,
            participants: None,
            checks: Vec::new(),
            tx_hash: None,
            error: None,
        }
    }
}

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

#[derive(Debug)]
struct AppStateInner {
    /// Next period to submit
    next_period: AtomicU64,
    /// Head slot from beacon node
    head_slot: AtomicU64,
    /// Head sync committee period
    head_period: AtomicU64,
    /// Tracked periods
    periods: DashMap<u64, PeriodRecord>,
    /// Service start time
    start_time: std::time::Instant,
    /// Last error message
    last_error: RwLock<Option<String>>,
    /// Set when the contract rejects an update; submission stops
    halted: RwLock<Option<String>>,
}

impl AppState {
    /// Create new application state starting at `next_period`
    #[must_use]
    pub fn new(next_period: u64) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                next_period: AtomicU64::new(next_period),
                head_slot: AtomicU64::new(0),
                head_period: AtomicU64::new(0),
                periods: DashMap::new(),
                start_time: std::time::Instant::now(),
                last_error: RwLock::new(None),
                halted: RwLock::new(None),
            }),
        }
    }

    /// Next period to submit
    #[must_use]
    pub fn next_period(&self) -> u64 {
        self.inner.next_period.load(Ordering::Relaxed)
    }

    /// Move the cursor past `period` once its update is confirmed.
    ///
    /// Only the cursor's own period advances it, so periods are never skipped.
    pub fn advance_from(&self, period: u64) -> bool {
        self.inner
            .next_period
            .compare_exchange(period, period + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    #[must_use]
    pub fn head_slot(&self) -> u64 {
        self.inner.head_slot.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn head_period(&self) -> u64 {
        self.inner.head_period.load(Ordering::Relaxed)
    }

    /// Record the beacon head
    pub fn set_head(&self, slot: u64, period: u64) {
        self.inner.head_slot.store(slot, Ordering::Relaxed);
        self.inner.head_period.store(period, Ordering::Relaxed);
    }

    /// Periods between the cursor and the head period
    #[must_use]
    pub fn periods_behind(&self) -> u64 {
        self.head_period().saturating_sub(self.next_period())
    }

    /// Healthy while not halted and at most one period behind head
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.halted().is_none() && self.periods_behind() <= 1
    }

    /// Get uptime in seconds
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    /// The period is not yet available from the data source
    pub fn mark_waiting(&self, period: u64, reason: String) {
        let mut record = self
            .inner
            .periods
            .entry(period)
            .or_insert_with(|| PeriodRecord::new(period, UpdateStatus::Waiting));
        record.status = UpdateStatus::Waiting;
        record.error = Some(reason);
    }

    /// The period's update was assembled
    pub fn mark_assembled(&self, update: &ChainRelayUpdate, checks: Vec<ProofCheck>) {
        let mut record = PeriodRecord::new(update.period, UpdateStatus::Assembled);
        record.latest_slot = Some(update.latest_slot);
        record.finalized_slot = Some(update.finalized_slot);
        record.participants = Some(update.participant_count());
        record.checks = checks;
        self.inner.periods.insert(update.period, record);
    }

    /// The period's update was confirmed on-chain
    pub fn mark_confirmed(&self, period: u64, tx_hash: String) {
        let mut record = self
            .inner
            .periods
            .entry(period)
            .or_insert_with(|| PeriodRecord::new(period, UpdateStatus::Confirmed));
        record.status = UpdateStatus::Confirmed;
        record.tx_hash = Some(tx_hash);
        record.error = None;
    }

    /// The relay contract already holds the period, with no receipt of ours
    pub fn mark_relayed(&self, period: u64) {
        let mut record = self
            .inner
            .periods
            .entry(period)
            .or_insert_with(|| PeriodRecord::new(period, UpdateStatus::Confirmed));
        record.status = UpdateStatus::Confirmed;
        record.error = None;
    }

    /// Assembly or submission for the period failed
    pub fn mark_failed(&self, period: u64, error: String) {
        let mut record = self
            .inner
            .periods
            .entry(period)
            .or_insert_with(|| PeriodRecord::new(period, UpdateStatus::Failed));
        record.status = UpdateStatus::Failed;
        record.error = Some(error);
    }

    /// Get a period record
    #[must_use]
    pub fn get_period(&self, period: u64) -> Option<PeriodRecord> {
        self.inner.periods.get(&period).map(|r| r.clone())
    }

    /// All period records, ascending
    #[must_use]
    pub fn all_periods(&self) -> Vec<PeriodRecord> {
        let mut records: Vec<PeriodRecord> = self
            .inner
            .periods
            .iter()
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.period);
        records
    }

    /// Get period counts by status
    #[must_use]
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.inner.periods.iter() {
            match entry.status {
                UpdateStatus::Waiting => counts.waiting += 1,
                UpdateStatus::Assembled => counts.assembled += 1,
                UpdateStatus::Confirmed => counts.confirmed += 1,
                UpdateStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Set last error
    pub fn set_error(&self, error: Option<String>) {
        *self.inner.last_error.write() = error;
    }

    /// Get last error
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().clone()
    }

    /// Stop submitting with the given reason
    pub fn halt(&self, reason: String) {
        *self.inner.halted.write() = Some(reason);
    }

    /// Reason submission stopped, if it did
    #[must_use]
    pub fn halted(&self) -> Option<String> {
        self.inner.halted.read().clone()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Counts of periods by status
#[derive(Debug, Default, Clone, Serialize)]
pub struct StatusCounts {
    pub waiting: usize,
    pub assembled: usize,
    pub confirmed: usize,
    pub failed: usize,
}
