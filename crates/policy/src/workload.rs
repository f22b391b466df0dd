//! Workload description
//!
//! The engine only needs to know how many transaction types exist and, when
//! the workload declares it, how many accesses each type performs. A count
//! of zero means the type's length is unknown, which disables commit-time
//! lookahead for it.

use morph_core::TxnType;
use serde::{Deserialize, Serialize};

/// Per-type shape of the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// Accesses per transaction type (0 = unknown)
    pub access_counts: Vec<u32>,
}

impl Default for WorkloadProfile {
    fn default() -> Self {
        Self {
            access_counts: vec![0],
        }
    }
}

impl WorkloadProfile {
    /// Profile with `txn_types` types of unknown length
    pub fn with_types(txn_types: usize) -> Self {
        Self {
            access_counts: vec![0; txn_types.max(1)],
        }
    }

    /// Profile with known per-type access counts
    pub fn with_access_counts(access_counts: Vec<u32>) -> Self {
        if access_counts.is_empty() {
            return Self::default();
        }
        Self { access_counts }
    }

    /// Number of transaction types
    pub fn txn_types(&self) -> usize {
        self.access_counts.len()
    }

    /// Declared access count for `txn_type`, if known
    pub fn access_count(&self, txn_type: TxnType) -> Option<u32> {
        match self.access_counts.get(txn_type.index()) {
            Some(&0) | None => None,
            Some(&n) => Some(n),
        }
    }

    /// Whether `op_count` accesses complete a `txn_type` transaction
    pub fn is_final_op(&self, txn_type: TxnType, op_count: u32) -> bool {
        self.access_count(txn_type)
            .map_or(false, |count| op_count >= count)
    }
}
