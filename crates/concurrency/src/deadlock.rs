//! Deadlock-avoidance admission checks
//!
//! Consulted only when a lock request that must wait was issued with
//! `allow_unsorted`. Each check answers "could `owner` already be waiting,
//! directly or transitively, on `requester`?" conservatively; a `true`
//! refuses the wait.

use crate::config::DeadlockStrategy;
use crate::descriptor::TransactionDescriptor;
use std::sync::atomic::Ordering;

const BITMAP_MODULI: [u64; 2] = [53, 59];

/// Hashed identity bits of a transaction, one per bitmap
pub(crate) fn own_bits(txn: &TransactionDescriptor) -> [u64; 2] {
    let id = txn.id().as_u64();
    [1u64 << (id % BITMAP_MODULI[0]), 1u64 << (id % BITMAP_MODULI[1])]
}

impl DeadlockStrategy {
    /// Whether waiting for `owner` may close a cycle through `requester`
    pub fn has_deadlock(self, owner: &TransactionDescriptor, requester: &TransactionDescriptor) -> bool {
        match self {
            DeadlockStrategy::WaitDie => owner.id().is_older_than(requester.id()),
            DeadlockStrategy::CautiousWait => owner.is_blocked(),
            DeadlockStrategy::Bitmap => {
                let bits = own_bits(requester);
                owner
                    .deadlock_bits
                    .iter()
                    .zip(bits)
                    .all(|(mask, bit)| mask.load(Ordering::Acquire) & bit != 0)
            }
            DeadlockStrategy::DependencyGraph => requester.deps().reaches(owner.id()),
        }
    }

    /// Record that `requester` now waits on `owner`
    ///
    /// Only the bitmap check keeps state: the requester inherits the owner's
    /// masks plus the owner's own bits.
    pub fn merge(self, owner: &TransactionDescriptor, requester: &TransactionDescriptor) {
        if self != DeadlockStrategy::Bitmap {
            return;
        }
        let bits = own_bits(owner);
        for (i, bit) in bits.iter().enumerate() {
            let inherited = owner.deadlock_bits[i].load(Ordering::Acquire) | bit;
            requester.deadlock_bits[i].fetch_or(inherited, Ordering::AcqRel);
        }
    }
}
