//! Transaction descriptors
//!
//! A [`TransactionDescriptor`] is the live, shared view of one transaction
//! attempt. Its owning thread advances the operation counter and refreshes
//! the cached policy; other threads read its stage, blocked flag, progress
//! and dependency counters from inside lock and dependency operations, so
//! every mutable field is atomic.

use crate::context::CcContext;
use crate::dependency::DependencyState;
use morph_core::{OpKind, TxnId, TxnType};
use morph_policy::{ExposePolicy, Feature, FeatureVector, PolicyEntry, WaitPriority};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const NO_STATE: u32 = u32::MAX;

/// Lifecycle stage of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnStage {
    /// Executing or committing
    Active = 0,
    /// Writes installed
    Committed = 1,
    /// Rolled back
    Aborted = 2,
}

impl TxnStage {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TxnStage::Active,
            1 => TxnStage::Committed,
            _ => TxnStage::Aborted,
        }
    }
}

/// Shared per-attempt state
pub struct TransactionDescriptor {
    id: TxnId,
    txn_type: TxnType,
    ctx: Arc<CcContext>,
    stage: AtomicU8,
    blocked: AtomicBool,
    op_count: AtomicU32,
    cur_op: AtomicU8,
    state: AtomicU32,
    commit_version: AtomicU64,
    /// Bitmap deadlock-check masks
    pub(crate) deadlock_bits: [AtomicU64; 2],
    deps: DependencyState,
}

impl TransactionDescriptor {
    /// Create the descriptor of a fresh attempt
    pub fn new(id: TxnId, txn_type: TxnType, ctx: Arc<CcContext>) -> Arc<Self> {
        let deps = DependencyState::new(ctx.tracker().mode());
        Arc::new(Self {
            id,
            txn_type,
            ctx,
            stage: AtomicU8::new(TxnStage::Active as u8),
            blocked: AtomicBool::new(false),
            op_count: AtomicU32::new(0),
            cur_op: AtomicU8::new(OpKind::None as u8),
            state: AtomicU32::new(NO_STATE),
            commit_version: AtomicU64::new(0),
            deadlock_bits: [AtomicU64::new(0), AtomicU64::new(0)],
            deps,
        })
    }

    /// Attempt id (smaller = older)
    #[inline]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Transaction type
    #[inline]
    pub fn txn_type(&self) -> TxnType {
        self.txn_type
    }

    /// Engine context
    #[inline]
    pub fn context(&self) -> &Arc<CcContext> {
        &self.ctx
    }

    /// Dependency bookkeeping
    #[inline]
    pub fn deps(&self) -> &DependencyState {
        &self.deps
    }

    // ========================================================================
    // Stage
    // ========================================================================

    /// Current stage
    #[inline]
    pub fn stage(&self) -> TxnStage {
        TxnStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    /// Whether the attempt is still running
    pub fn is_active(&self) -> bool {
        self.stage() == TxnStage::Active
    }

    /// Whether the attempt rolled back
    pub fn is_aborted(&self) -> bool {
        self.stage() == TxnStage::Aborted
    }

    /// Version the attempt committed at (0 before commit)
    pub fn commit_version(&self) -> u64 {
        self.commit_version.load(Ordering::Acquire)
    }

    /// Publish the commit; the version is visible before the stage flips
    pub(crate) fn mark_committed(&self, version: u64) {
        self.commit_version.store(version, Ordering::Release);
        self.stage.store(TxnStage::Committed as u8, Ordering::Release);
    }

    pub(crate) fn mark_aborted(&self) {
        self.stage.store(TxnStage::Aborted as u8, Ordering::Release);
    }

    // ========================================================================
    // Blocking
    // ========================================================================

    /// Whether the attempt is spinning inside a lock acquisition
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    pub(crate) fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Release);
        if !blocked {
            for mask in &self.deadlock_bits {
                mask.store(0, Ordering::Release);
            }
        }
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Accesses executed so far
    #[inline]
    pub fn op_count(&self) -> u32 {
        self.op_count.load(Ordering::Acquire)
    }

    /// Kind of the operation in progress
    #[inline]
    pub fn current_op(&self) -> OpKind {
        OpKind::from_u8(self.cur_op.load(Ordering::Acquire))
    }

    /// Start a new access of `kind`
    pub(crate) fn begin_op(&self, kind: OpKind) {
        self.op_count.fetch_add(1, Ordering::AcqRel);
        self.set_current_op(kind);
    }

    /// Switch the current operation kind without counting an access
    pub(crate) fn set_current_op(&self, kind: OpKind) {
        self.cur_op.store(kind as u8, Ordering::Release);
    }

    // ========================================================================
    // Policy
    // ========================================================================

    /// Live encoder features
    pub fn features(&self) -> FeatureVector {
        let mut features = [0u32; morph_policy::N_FEATURES];
        features[Feature::TxnType.index()] = u32::from(self.txn_type.0);
        features[Feature::OpKind.index()] = self.current_op().feature();
        features[Feature::OpCount.index()] = self.op_count();
        features[Feature::BlockedOn.index()] = self.deps.dep_on();
        features[Feature::Blocking.index()] = self.deps.dep_by();
        features[Feature::GlobalBlocked.index()] = self.ctx.metrics().blocked_now();
        features
    }

    /// Encode the current features, cache the state, and return its entry
    pub fn refresh_policy(&self) -> &PolicyEntry {
        let state = self.ctx.encoder().encode(&self.features());
        self.state.store(state, Ordering::Release);
        self.ctx.metrics().record_state(state);
        self.ctx.policy().lookup(state)
    }

    /// Cached state, if a policy was ever refreshed
    pub fn cached_state(&self) -> Option<u32> {
        match self.state.load(Ordering::Acquire) {
            NO_STATE => None,
            state => Some(state),
        }
    }

    /// Cached entry, refreshing first if none is cached
    pub fn current_policy(&self) -> &PolicyEntry {
        match self.cached_state() {
            Some(state) => self.ctx.policy().lookup(state),
            None => self.refresh_policy(),
        }
    }

    /// Rank of the cached policy
    pub fn current_priority(&self) -> WaitPriority {
        self.current_policy().priority
    }

    /// Expose policy of the current entry, looking one access ahead
    ///
    /// For a commit-type operation that is not the transaction's final
    /// access, the expose sub-policy is borrowed from the state the next
    /// access would encode to. The result is stored in the entry once and
    /// reused by every later caller landing on the same state. The op
    /// counter itself is never touched.
    pub fn policy_with_lookahead(&self) -> &ExposePolicy {
        let entry = self.refresh_policy();
        if self.current_op() != OpKind::Commit || entry.has_lookahead() {
            return entry.expose_policy();
        }
        if self
            .ctx
            .workload()
            .is_final_op(self.txn_type, self.op_count())
        {
            return entry.expose_policy();
        }
        entry.expose_policy_or_init(|| {
            let mut next = self.features();
            next[Feature::OpCount.index()] = next[Feature::OpCount.index()].saturating_add(1);
            let state = self.ctx.encoder().encode(&next);
            self.ctx.policy().lookup(state).as_expose()
        })
    }
}

impl fmt::Debug for TransactionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionDescriptor")
            .field("id", &self.id)
            .field("txn_type", &self.txn_type)
            .field("stage", &self.stage())
            .field("blocked", &self.is_blocked())
            .field("op_count", &self.op_count())
            .field("dep_on", &self.deps.dep_on())
            .field("dep_by", &self.deps.dep_by())
            .finish()
    }
}
