//! Record lock table
//!
//! Maps keys to their [`RecordLock`], creating managers on first use and
//! dropping them again once a release leaves them idle and unreferenced.
//! The map lock is only held to look up, insert or remove the `Arc`;
//! acquisition and waiting happen on the record lock itself.

use crate::descriptor::TransactionDescriptor;
use crate::lock::{LockMode, LockOutcome, RecordLock};
use dashmap::DashMap;
use morph_core::{Key, TxnId};
use morph_policy::WaitPriority;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use tracing::warn;

/// Key-indexed record locks
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<Key, Arc<RecordLock>, BuildHasherDefault<FxHasher>>,
}

impl LockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record lock for `key`, created if absent
    pub fn lock_for(&self, key: &Key) -> Arc<RecordLock> {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(RecordLock::new()))
                .value(),
        )
    }

    /// Record lock for `key`, if one is live
    pub fn get(&self, key: &Key) -> Option<Arc<RecordLock>> {
        self.locks.get(key).map(|l| Arc::clone(l.value()))
    }

    /// Acquire `key` for `txn`; see [`RecordLock::acquire`]
    pub fn acquire(
        &self,
        key: &Key,
        mode: LockMode,
        txn: &Arc<TransactionDescriptor>,
        priority: WaitPriority,
        timeout_us: u32,
        allow_unsorted: bool,
    ) -> LockOutcome {
        self.lock_for(key)
            .acquire(mode, txn, priority, timeout_us, allow_unsorted)
    }

    /// Release `txn`'s entry on `key`
    ///
    /// Returns false, with a warning, when no lock exists for `key`.
    pub fn release(&self, key: &Key, txn: &TransactionDescriptor) -> bool {
        let Some(lock) = self.get(key) else {
            warn!(txn_id = %txn.id(), %key, "Release of a key with no record lock");
            return false;
        };
        lock.release(txn);
        drop(lock);
        // Clones are taken under the shard lock, so a count of one means no
        // caller is about to acquire through this manager.
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1 && lock.is_idle());
        true
    }

    /// Release `txn`'s entries on every key in `keys`
    pub fn release_all<'a>(
        &self,
        txn: &TransactionDescriptor,
        keys: impl IntoIterator<Item = &'a Key>,
    ) {
        for key in keys {
            self.release(key, txn);
        }
    }

    /// No owner of `key` other than `txn`
    pub fn is_free_for(&self, key: &Key, txn: TxnId) -> bool {
        self.get(key).map_or(true, |l| l.is_free_for(txn))
    }

    /// No exclusive owner of `key` other than `txn`
    pub fn is_unmodified_for(&self, key: &Key, txn: TxnId) -> bool {
        self.get(key).map_or(true, |l| l.is_unmodified_for(txn))
    }

    /// Number of records with a lock manager
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no record lock exists
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
