//! Engine counters
//!
//! Relaxed atomics; values are a side observation and never gate
//! correctness. The one exception is the blocked-transaction gauge, which
//! feeds the "global blocked" encoder feature and is therefore read on every
//! policy refresh.

use morph_core::AbortReason;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const N_REASONS: usize = AbortReason::ALL.len();

/// Live counters shared through the context
#[derive(Debug)]
pub struct CcMetrics {
    commits: AtomicU64,
    aborts: [AtomicU64; N_REASONS],
    lock_acquisitions: AtomicU64,
    lock_waits: AtomicU64,
    lock_refusals: AtomicU64,
    lock_timeouts: AtomicU64,
    state_visits: Box<[AtomicU64]>,
    blocked: AtomicU32,
}

impl CcMetrics {
    /// Counters with a visit histogram of `max_state` buckets
    pub fn new(max_state: usize) -> Self {
        Self {
            commits: AtomicU64::new(0),
            aborts: std::array::from_fn(|_| AtomicU64::new(0)),
            lock_acquisitions: AtomicU64::new(0),
            lock_waits: AtomicU64::new(0),
            lock_refusals: AtomicU64::new(0),
            lock_timeouts: AtomicU64::new(0),
            state_visits: (0..max_state).map(|_| AtomicU64::new(0)).collect(),
            blocked: AtomicU32::new(0),
        }
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self, reason: AbortReason) {
        self.aborts[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_state(&self, state: u32) {
        if let Some(bucket) = self.state_visits.get(state as usize) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_grant(&self, waited: bool) {
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        if waited {
            self.lock_waits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_refusal(&self) {
        self.lock_refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.lock_waits.fetch_add(1, Ordering::Relaxed);
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn leave_blocked(&self) {
        let prev = self.blocked.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "blocked gauge underflow");
    }

    /// Transactions currently spinning in a lock wait
    #[inline]
    pub fn blocked_now(&self) -> u32 {
        self.blocked.load(Ordering::Relaxed)
    }

    /// Aborts recorded for `reason`
    pub fn aborts(&self, reason: AbortReason) -> u64 {
        self.aborts[reason.index()].load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let aborts: Vec<(AbortReason, u64)> = AbortReason::ALL
            .iter()
            .map(|r| (*r, self.aborts(*r)))
            .collect();
        MetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            total_aborts: aborts.iter().map(|(_, n)| n).sum(),
            aborts,
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            lock_refusals: self.lock_refusals.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            state_visits: self
                .state_visits
                .iter()
                .map(|v| v.load(Ordering::Relaxed))
                .collect(),
            blocked: self.blocked_now(),
        }
    }
}

/// Plain copy of [`CcMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Committed attempts
    pub commits: u64,
    /// Aborted attempts, all reasons
    pub total_aborts: u64,
    /// Aborted attempts per reason
    pub aborts: Vec<(AbortReason, u64)>,
    /// Granted lock requests
    pub lock_acquisitions: u64,
    /// Lock requests that had to queue
    pub lock_waits: u64,
    /// Lock requests refused by the deadlock check
    pub lock_refusals: u64,
    /// Lock waits abandoned on timeout
    pub lock_timeouts: u64,
    /// Policy refreshes per state
    pub state_visits: Vec<u64>,
    /// Transactions blocked when the snapshot was taken
    pub blocked: u32,
}

impl MetricsSnapshot {
    /// Aborts for one reason
    pub fn aborts_for(&self, reason: AbortReason) -> u64 {
        self.aborts
            .iter()
            .find(|(r, _)| *r == reason)
            .map_or(0, |(_, n)| *n)
    }

    /// Committed fraction of finished attempts (0.0 when none finished)
    pub fn commit_rate(&self) -> f64 {
        let finished = self.commits + self.total_aborts;
        if finished == 0 {
            return 0.0;
        }
        self.commits as f64 / finished as f64
    }
}
