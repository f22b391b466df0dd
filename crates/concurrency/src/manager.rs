//! Transaction manager
//!
//! Owns everything transactions share beyond the read-only context: the
//! storage handle, the record lock table, the exposure table, and the two
//! global counters.
//!
//! ## Attempt lifecycle
//!
//! ```text
//! 1. begin() - allocate a TxnId, build the descriptor
//! 2. read()/write() - each access re-encodes and follows its policy entry
//! 3. commit() - drain dependencies, lock write set, validate, install
//! 4. on a retryable abort, run() backs off and starts a fresh attempt
//! ```
//!
//! Ids grow monotonically, so a retry is always younger than its previous
//! attempt. Version gaps are impossible: a version is only allocated once
//! validation has passed and the installs cannot fail.

use crate::context::CcContext;
use crate::exposure::ExposureTable;
use crate::table::LockTable;
use crate::transaction::Transaction;
use morph_core::{Error, Result, Storage, TxnId, TxnType};
use morph_policy::BackoffAction;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Coordinates transaction attempts over one store
pub struct TransactionManager {
    ctx: Arc<CcContext>,
    storage: Arc<dyn Storage>,
    locks: LockTable,
    exposure: ExposureTable,

    /// Global version counter
    ///
    /// Monotonically increasing. Each committing writer increments it by 1
    /// and installs all its keys at the new value.
    version: AtomicU64,

    /// Next transaction id
    next_txn_id: AtomicU64,

    /// Running backoff per transaction type, in microseconds
    ///
    /// Only used with a learned backoff schedule.
    backoff: Mutex<Vec<f64>>,
}

impl TransactionManager {
    /// Create a manager starting at version 0
    pub fn new(ctx: Arc<CcContext>, storage: Arc<dyn Storage>) -> Self {
        Self::with_version(ctx, storage, 0)
    }

    /// Create a manager whose first commit gets `initial_version + 1`
    ///
    /// Used when the store already holds data committed at earlier versions.
    pub fn with_version(ctx: Arc<CcContext>, storage: Arc<dyn Storage>, initial_version: u64) -> Self {
        let txn_types = ctx.workload().txn_types();
        TransactionManager {
            ctx,
            storage,
            locks: LockTable::new(),
            exposure: ExposureTable::new(),
            version: AtomicU64::new(initial_version),
            next_txn_id: AtomicU64::new(1),
            backoff: Mutex::new(vec![0.0; txn_types]),
        }
    }

    /// Engine context
    pub fn context(&self) -> &Arc<CcContext> {
        &self.ctx
    }

    /// Committed-data store
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Record lock table
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Exposed uncommitted writes
    pub fn exposure(&self) -> &ExposureTable {
        &self.exposure
    }

    /// Get current global version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> TxnId {
        TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocate next commit version (increment global version)
    pub fn allocate_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start an attempt of a `txn_type` transaction
    pub fn begin(&self, txn_type: TxnType) -> Result<Transaction<'_>> {
        let types = self.ctx.workload().txn_types();
        if txn_type.index() >= types {
            return Err(Error::InvalidConfig(format!(
                "{} is outside the {} configured transaction types",
                txn_type, types
            )));
        }
        Ok(Transaction::new(self, self.next_txn_id(), txn_type))
    }

    /// Run `body` in a transaction and commit, retrying retryable aborts
    ///
    /// Each retry is a fresh attempt with a new id. Between attempts the
    /// thread sleeps for the type's backoff. Non-retryable errors and the
    /// last attempt's error are returned as is.
    pub fn run<T, F>(&self, txn_type: TxnType, mut body: F) -> Result<T>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T>,
    {
        let retry_times = self.ctx.config().retry_times;
        let mut retry = 0usize;
        loop {
            let mut txn = self.begin(txn_type)?;
            let id = txn.id();
            let result = match body(&mut txn) {
                Ok(value) => txn.commit().map(|_| value),
                Err(e) => {
                    drop(txn);
                    Err(e)
                }
            };

            match result {
                Ok(value) => {
                    self.record_outcome(txn_type, true, retry);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && retry < retry_times => {
                    self.record_outcome(txn_type, false, retry);
                    let delay = self.backoff_delay(txn_type, retry);
                    debug!(
                        txn_id = %id,
                        %txn_type,
                        retry,
                        delay_us = delay.as_micros() as u64,
                        error = %e,
                        "Retrying transaction"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    retry += 1;
                }
                Err(e) => {
                    self.record_outcome(txn_type, false, retry);
                    return Err(e);
                }
            }
        }
    }

    /// Delay before retry number `retry + 1` of a `txn_type` transaction
    pub fn backoff_delay(&self, txn_type: TxnType, retry: usize) -> Duration {
        if self.ctx.policy().backoff().is_learned() {
            let running = self
                .backoff
                .lock()
                .get(txn_type.index())
                .copied()
                .unwrap_or(0.0);
            Duration::from_micros(running.max(0.0) as u64)
        } else {
            let base = self.ctx.config().backoff_base_us;
            Duration::from_micros(base.saturating_mul(retry as u64 + 1))
        }
    }

    /// Adjust the type's running backoff after an attempt finished
    fn record_outcome(&self, txn_type: TxnType, committed: bool, retry: usize) {
        let schedule = self.ctx.policy().backoff();
        if !schedule.is_learned() {
            return;
        }
        let mut backoff = self.backoff.lock();
        let Some(running) = backoff.get_mut(txn_type.index()) else {
            return;
        };
        match schedule.action(committed, retry, txn_type) {
            BackoffAction::Increase(delta) => *running += delta,
            BackoffAction::Decrease(delta) => *running = (*running - delta).max(0.0),
            BackoffAction::Hold => {}
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("policy", &self.ctx.policy().name())
            .field("version", &self.current_version())
            .field("next_txn_id", &self.next_txn_id.load(Ordering::Relaxed))
            .field("locks", &self.locks.len())
            .field("exposed", &self.exposure.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CcConfig;
    use morph_core::{AbortReason, Key};
    use morph_policy::{BackoffSchedule, PolicyPreset, PolicyTable, WorkloadProfile};
    use morph_storage::ShardedStore;
    use std::sync::atomic::AtomicUsize;

    fn manager(config: CcConfig) -> TransactionManager {
        let ctx = Arc::new(CcContext::new(config).unwrap());
        TransactionManager::new(ctx, Arc::new(ShardedStore::new()))
    }

    #[test]
    fn test_counters_are_monotonic() {
        let mgr = manager(CcConfig::default());
        assert_eq!(mgr.current_version(), 0);
        assert_eq!(mgr.next_txn_id(), TxnId(1));
        assert_eq!(mgr.next_txn_id(), TxnId(2));
        assert_eq!(mgr.allocate_version(), 1);
        assert_eq!(mgr.allocate_version(), 2);
        assert_eq!(mgr.current_version(), 2);
    }

    #[test]
    fn test_with_version_continues_numbering() {
        let ctx = Arc::new(CcContext::new(CcConfig::default()).unwrap());
        let mgr = TransactionManager::with_version(ctx, Arc::new(ShardedStore::new()), 41);
        mgr.run(TxnType(0), |txn| txn.write(Key::from("k"), b"v".to_vec()))
            .unwrap();
        assert_eq!(mgr.current_version(), 42);
        assert_eq!(mgr.storage().version_of(&Key::from("k")), 42);
    }

    #[test]
    fn test_begin_rejects_unknown_type() {
        let mgr = manager(CcConfig::default());
        assert!(matches!(mgr.begin(TxnType(3)), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_run_retries_then_succeeds() {
        let mgr = manager(CcConfig::default());
        let attempts = AtomicUsize::new(0);
        let mut ids = Vec::new();
        let value = mgr
            .run(TxnType(0), |txn| {
                ids.push(txn.id());
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(Error::aborted(txn.id(), AbortReason::Timeout));
                }
                txn.write(Key::from("k"), b"done".to_vec())?;
                Ok(7)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // each retry is a younger attempt
        assert!(ids.windows(2).all(|w| w[0].is_older_than(w[1])));
        // the closure's own error left two unfinished attempts behind
        assert_eq!(mgr.context().metrics().aborts(AbortReason::User), 2);
    }

    #[test]
    fn test_run_gives_up_after_retry_times() {
        let config = CcConfig {
            retry_times: 1,
            ..CcConfig::default()
        };
        let mgr = manager(config);
        let mut attempts = 0;
        let err = mgr
            .run(TxnType(0), |txn| -> Result<()> {
                attempts += 1;
                Err(Error::aborted(txn.id(), AbortReason::ValidationFailed))
            })
            .unwrap_err();
        assert_eq!(attempts, 2);
        assert_eq!(err.abort_reason(), Some(AbortReason::ValidationFailed));
    }

    #[test]
    fn test_run_does_not_retry_user_errors() {
        let mgr = manager(CcConfig::default());
        let mut attempts = 0;
        let err = mgr
            .run(TxnType(0), |_| -> Result<()> {
                attempts += 1;
                Err(Error::NotFound(Key::from("missing")))
            })
            .unwrap_err();
        assert_eq!(attempts, 1);
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_linear_backoff_without_schedule() {
        let config = CcConfig {
            backoff_base_us: 20,
            ..CcConfig::default()
        };
        let mgr = manager(config);
        assert_eq!(mgr.backoff_delay(TxnType(0), 0), Duration::from_micros(20));
        assert_eq!(mgr.backoff_delay(TxnType(0), 2), Duration::from_micros(60));
    }

    #[test]
    fn test_learned_backoff_rises_and_falls() {
        let schedule = BackoffSchedule {
            increase: vec![vec![10.0, 100.0]],
            decrease: vec![vec![4.0, 40.0]],
        };
        let policy = PolicyTable::preset(PolicyPreset::TwoPhaseLocking, 2).with_backoff(schedule);
        let config = CcConfig::default().with_workload(WorkloadProfile::with_types(2));
        let ctx = Arc::new(CcContext::with_policy(config, policy).unwrap());
        let mgr = TransactionManager::new(ctx, Arc::new(ShardedStore::new()));

        mgr.record_outcome(TxnType(1), false, 0);
        mgr.record_outcome(TxnType(1), false, 1);
        assert_eq!(mgr.backoff_delay(TxnType(1), 5), Duration::from_micros(200));
        assert_eq!(mgr.backoff_delay(TxnType(0), 0), Duration::ZERO);

        mgr.record_outcome(TxnType(1), true, 0);
        assert_eq!(mgr.backoff_delay(TxnType(1), 0), Duration::from_micros(160));
        for _ in 0..10 {
            mgr.record_outcome(TxnType(1), true, 0);
        }
        assert_eq!(mgr.backoff_delay(TxnType(1), 0), Duration::ZERO);
    }
}
