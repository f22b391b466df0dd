//! Per-record reader/writer lock manager
//!
//! One [`RecordLock`] guards one record. It keeps an owner set, a waiter
//! queue ordered by descending priority (FIFO among equal priorities), and
//! an arena of [`LockEntry`] slots both lists index into. Requests that
//! skip the deadlock check queue in the same order as the rest. All bookkeeping
//! happens under the record's own mutex; blocked requesters spin outside
//! it on their entry's `ready` flag.
//!
//! ```text
//!            acquire (no conflict)          release (last owner)
//!   None ───────────────────────────▶ S/X ──────────────────────▶ None
//!                                     │ ▲
//!                 acquire (conflict)  │ │ promote
//!                                     ▼ │
//!                                   waiters
//! ```
//!
//! # Real-time priority
//!
//! With `real_time_priority` set the queue is plain FIFO and ranking is by
//! each waiter's live policy priority, lowest first. Promotion takes the
//! lowest-ranked live waiter, and a compatible request queues behind any
//! live waiter that ranks lower than it. Aborted waiters rank nowhere.
//!
//! # Dependency edges
//!
//! Every owner→waiter wait is mirrored as exactly one tracker edge, recorded
//! in the waiter's `blocked_by` list. An edge is removed when its owner
//! releases, when its waiter is removed, or when its waiter is promoted, so
//! a balanced acquire/release history leaves every counter at zero.
//!
//! # Timeouts
//!
//! A waiter whose spin times out stays queued and the call reports
//! [`LockOutcome::Pending`]. The entry may still be promoted later; the
//! caller must eventually [`RecordLock::release`] it either way.

use crate::descriptor::TransactionDescriptor;
use morph_core::TxnId;
use morph_policy::WaitPriority;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Spins between cooperative yields while waiting
const SPINS_PER_YIELD: u32 = 64;

/// Requested access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Any number of concurrent readers
    Shared,
    /// Single writer
    Exclusive,
}

impl LockMode {
    /// Whether a request for `requested` conflicts with a record held in `current`
    #[inline]
    pub fn conflicts(current: Option<LockMode>, requested: LockMode) -> bool {
        match current {
            None => false,
            Some(LockMode::Exclusive) => true,
            Some(LockMode::Shared) => requested == LockMode::Exclusive,
        }
    }
}

/// Result of [`RecordLock::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The requester owns the lock
    Granted,
    /// Waiting was refused by the deadlock check; nothing was queued
    Refused,
    /// The wait timed out; the request is still queued
    Pending,
}

/// Owner or waiter record
struct LockEntry {
    mode: LockMode,
    txn: Arc<TransactionDescriptor>,
    priority: WaitPriority,
    ready: Arc<AtomicBool>,
    /// Owners holding a dependency edge onto this entry's transaction
    blocked_by: SmallVec<[Arc<TransactionDescriptor>; 2]>,
}

#[derive(Default)]
struct LockState {
    mode: Option<LockMode>,
    owners: SmallVec<[usize; 4]>,
    waiters: VecDeque<usize>,
    slots: Vec<Option<LockEntry>>,
    free: Vec<usize>,
}

impl LockState {
    fn alloc(&mut self, entry: LockEntry) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    fn take(&mut self, slot: usize) -> LockEntry {
        let entry = self.slots[slot]
            .take()
            .unwrap_or_else(|| panic!("lock slot {} is empty", slot));
        self.free.push(slot);
        entry
    }

    #[inline]
    fn entry(&self, slot: usize) -> &LockEntry {
        self.slots[slot]
            .as_ref()
            .unwrap_or_else(|| panic!("lock slot {} is empty", slot))
    }

    #[inline]
    fn entry_mut(&mut self, slot: usize) -> &mut LockEntry {
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| panic!("lock slot {} is empty", slot))
    }

    fn find_owner(&self, txn: TxnId) -> Option<usize> {
        self.owners
            .iter()
            .position(|&slot| self.entry(slot).txn.id() == txn)
    }

    fn find_waiter(&self, txn: TxnId) -> Option<usize> {
        self.waiters
            .iter()
            .position(|&slot| self.entry(slot).txn.id() == txn)
    }

    /// Queue position for `priority`: behind every entry at least as prior
    fn sorted_position(&self, priority: WaitPriority) -> usize {
        self.waiters
            .iter()
            .position(|&slot| !self.entry(slot).priority.is_prior_or_eq(priority))
            .unwrap_or(self.waiters.len())
    }

    /// Whether some waiter outranks `priority`
    ///
    /// Real-time mode uses the order [`LockState::pop_best`] promotes in.
    fn outranked(&self, priority: WaitPriority, real_time: bool) -> bool {
        if real_time {
            self.waiters.iter().any(|&slot| {
                let waiter = &self.entry(slot).txn;
                !waiter.is_aborted() && priority.is_prior(waiter.current_priority())
            })
        } else {
            self.waiters
                .front()
                .map_or(false, |&slot| self.entry(slot).priority.is_prior(priority))
        }
    }

    /// Queue position of the next waiter to admit, if it fits the current mode
    fn pop_best(&self, real_time: bool) -> Option<usize> {
        let pos = if real_time {
            // Smallest live priority among transactions still running.
            self.waiters
                .iter()
                .enumerate()
                .filter(|&(_, &slot)| !self.entry(slot).txn.is_aborted())
                .min_by(|&(_, &a), &(_, &b)| {
                    let pa = self.entry(a).txn.current_priority().value();
                    let pb = self.entry(b).txn.current_priority().value();
                    pa.total_cmp(&pb)
                })
                .map(|(pos, _)| pos)?
        } else if self.waiters.is_empty() {
            return None;
        } else {
            0
        };
        let slot = self.waiters[pos];
        if LockMode::conflicts(self.mode, self.entry(slot).mode) {
            return None;
        }
        Some(pos)
    }
}

/// Lock manager for a single record
pub struct RecordLock {
    state: Mutex<LockState>,
}

impl RecordLock {
    /// Create an unlocked record lock
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
        }
    }

    /// Acquire the record for `txn`
    ///
    /// Grants immediately when `mode` is compatible with the current owners
    /// and no queued waiter outranks `priority`. Otherwise the request
    /// waits: with `allow_unsorted` the deadlock check may refuse it first,
    /// and the wait itself is bounded by `timeout_us` (0 = unbounded).
    ///
    /// # Panics
    ///
    /// Panics if `txn` already owns or waits for this record.
    pub fn acquire(
        &self,
        mode: LockMode,
        txn: &Arc<TransactionDescriptor>,
        priority: WaitPriority,
        timeout_us: u32,
        allow_unsorted: bool,
    ) -> LockOutcome {
        let ctx = Arc::clone(txn.context());
        let tracker = ctx.tracker();
        let lock_config = *ctx.lock_config();
        let metrics = ctx.metrics();

        let ready = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            assert!(
                st.find_owner(txn.id()).is_none() && st.find_waiter(txn.id()).is_none(),
                "{} acquired a record lock it already holds or waits for",
                txn.id()
            );

            let conflict = LockMode::conflicts(st.mode, mode)
                || st.outranked(priority, lock_config.real_time_priority);

            if !conflict {
                if !lock_config.passive_wait_only {
                    for &w in &st.waiters {
                        let waiter = st.slots[w].as_mut().expect("queued slot is occupied");
                        tracker.add_edge(txn, &waiter.txn);
                        waiter.blocked_by.push(Arc::clone(txn));
                    }
                }
                let slot = st.alloc(LockEntry {
                    mode,
                    txn: Arc::clone(txn),
                    priority,
                    ready: Arc::new(AtomicBool::new(true)),
                    blocked_by: SmallVec::new(),
                });
                st.owners.push(slot);
                st.mode = Some(mode);
                metrics.record_grant(false);
                trace!(txn_id = %txn.id(), ?mode, owners = st.owners.len(), "Lock granted");
                return LockOutcome::Granted;
            }

            if allow_unsorted {
                let refused = st
                    .owners
                    .iter()
                    .any(|&o| tracker.has_potential_cycle(&st.entry(o).txn, txn));
                if refused {
                    metrics.record_refusal();
                    debug!(
                        txn_id = %txn.id(),
                        ?mode,
                        check = ?tracker.check(),
                        "Lock wait refused"
                    );
                    return LockOutcome::Refused;
                }
            }

            let mut blocked_by = SmallVec::new();
            for &o in &st.owners {
                let owner = &st.entry(o).txn;
                tracker.add_edge(owner, txn);
                if allow_unsorted {
                    tracker.merge(owner, txn);
                }
                blocked_by.push(Arc::clone(owner));
            }

            let ready = Arc::new(AtomicBool::new(false));
            let slot = st.alloc(LockEntry {
                mode,
                txn: Arc::clone(txn),
                priority,
                ready: Arc::clone(&ready),
                blocked_by,
            });
            if lock_config.real_time_priority {
                st.waiters.push_back(slot);
            } else {
                let pos = st.sorted_position(priority);
                st.waiters.insert(pos, slot);
            }
            txn.set_blocked(true);
            metrics.enter_blocked();
            trace!(
                txn_id = %txn.id(),
                ?mode,
                %priority,
                waiters = st.waiters.len(),
                "Lock wait queued"
            );
            ready
        };

        let granted = spin_until_ready(&ready, timeout_us);
        txn.set_blocked(false);
        metrics.leave_blocked();

        if granted {
            metrics.record_grant(true);
            trace!(txn_id = %txn.id(), ?mode, "Lock granted after wait");
            LockOutcome::Granted
        } else {
            metrics.record_timeout();
            debug!(txn_id = %txn.id(), ?mode, timeout_us, "Lock wait timed out");
            LockOutcome::Pending
        }
    }

    /// Drop `txn`'s owner or waiter entry, then promote waiters
    ///
    /// # Panics
    ///
    /// Panics if `txn` neither owns nor waits for this record.
    pub fn release(&self, txn: &TransactionDescriptor) {
        let ctx = Arc::clone(txn.context());
        let tracker = ctx.tracker();
        let lock_config = *ctx.lock_config();

        let mut guard = self.state.lock();
        let st = &mut *guard;

        if let Some(pos) = st.find_owner(txn.id()) {
            let slot = st.owners.remove(pos);
            let entry = st.take(slot);
            let LockState { waiters, slots, .. } = &mut *st;
            for &w in waiters.iter() {
                let waiter = slots[w].as_mut().expect("queued slot is occupied");
                if let Some(i) = waiter.blocked_by.iter().position(|b| b.id() == txn.id()) {
                    let owner = waiter.blocked_by.swap_remove(i);
                    tracker.remove_edge(&owner, &waiter.txn);
                }
            }
            if st.owners.is_empty() {
                st.mode = None;
            }
            trace!(txn_id = %txn.id(), mode = ?entry.mode, owners = st.owners.len(), "Lock released");
        } else if let Some(pos) = st.find_waiter(txn.id()) {
            let slot = st
                .waiters
                .remove(pos)
                .expect("waiter position is in range");
            let entry = st.take(slot);
            for owner in &entry.blocked_by {
                tracker.remove_edge(owner, &entry.txn);
            }
            trace!(txn_id = %txn.id(), "Queued lock request withdrawn");
        } else {
            panic!("{} released a record lock it neither holds nor waits for", txn.id());
        }

        Self::promote(st, tracker, lock_config.passive_wait_only, lock_config.real_time_priority);
    }

    /// Admit queued waiters while the best one fits the current mode
    fn promote(
        st: &mut LockState,
        tracker: &crate::dependency::DependencyTracker,
        passive: bool,
        real_time: bool,
    ) {
        while let Some(pos) = st.pop_best(real_time) {
            let slot = st
                .waiters
                .remove(pos)
                .expect("promoted position is in range");

            let promoted = st.entry_mut(slot);
            let released: SmallVec<[Arc<TransactionDescriptor>; 2]> =
                promoted.blocked_by.drain(..).collect();
            let promoted_txn = Arc::clone(&promoted.txn);
            let mode = promoted.mode;
            for owner in &released {
                tracker.remove_edge(owner, &promoted_txn);
            }

            if !passive {
                let LockState { waiters, slots, .. } = &mut *st;
                for &w in waiters.iter() {
                    let waiter = slots[w].as_mut().expect("queued slot is occupied");
                    tracker.add_edge(&promoted_txn, &waiter.txn);
                    waiter.blocked_by.push(Arc::clone(&promoted_txn));
                }
            }

            st.owners.push(slot);
            st.mode = Some(mode);
            // Publish last: the spinning thread reads nothing else.
            st.entry(slot).ready.store(true, Ordering::Release);
            trace!(txn_id = %promoted_txn.id(), ?mode, owners = st.owners.len(), "Lock promoted");
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Current mode (`None` when unowned)
    pub fn mode(&self) -> Option<LockMode> {
        self.state.lock().mode
    }

    /// Number of owners
    pub fn owner_count(&self) -> usize {
        self.state.lock().owners.len()
    }

    /// Number of queued requests
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Owners, in grant order
    pub fn owners(&self) -> Vec<TxnId> {
        let st = self.state.lock();
        st.owners.iter().map(|&s| st.entry(s).txn.id()).collect()
    }

    /// Waiters with their priorities, in queue order
    pub fn waiters(&self) -> Vec<(TxnId, WaitPriority)> {
        let st = self.state.lock();
        st.waiters
            .iter()
            .map(|&s| (st.entry(s).txn.id(), st.entry(s).priority))
            .collect()
    }

    /// Whether `txn` owns the record in `mode` or stronger
    pub fn holds(&self, txn: TxnId, mode: LockMode) -> bool {
        let st = self.state.lock();
        st.find_owner(txn).map_or(false, |pos| {
            let held = st.entry(st.owners[pos]).mode;
            held == LockMode::Exclusive || held == mode
        })
    }

    /// Whether nothing owns or waits on the record
    pub fn is_idle(&self) -> bool {
        let st = self.state.lock();
        st.owners.is_empty() && st.waiters.is_empty()
    }

    /// No owner other than `txn`
    pub fn is_free_for(&self, txn: TxnId) -> bool {
        let st = self.state.lock();
        st.owners.iter().all(|&s| st.entry(s).txn.id() == txn)
    }

    /// No exclusive owner other than `txn`
    pub fn is_unmodified_for(&self, txn: TxnId) -> bool {
        let st = self.state.lock();
        st.mode != Some(LockMode::Exclusive) || st.find_owner(txn).is_some()
    }
}

impl Default for RecordLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("RecordLock")
            .field("mode", &st.mode)
            .field("owners", &st.owners.len())
            .field("waiters", &st.waiters.len())
            .finish()
    }
}

/// Spin on `ready` until set or `timeout_us` elapses (0 = forever)
fn spin_until_ready(ready: &AtomicBool, timeout_us: u32) -> bool {
    let deadline =
        (timeout_us > 0).then(|| Instant::now() + Duration::from_micros(u64::from(timeout_us)));
    let mut spins = 0u32;
    loop {
        if ready.load(Ordering::Acquire) {
            return true;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return ready.load(Ordering::Acquire);
            }
        }
        spins = spins.wrapping_add(1);
        if spins % SPINS_PER_YIELD == 0 {
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}
