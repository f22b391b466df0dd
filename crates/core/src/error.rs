//! Error types for the concurrency core
//!
//! Two classes of failure exist:
//!
//! - **Abort conditions** (cascading abort, timeouts, validation failures,
//!   write interference, refused waits). These are expected and frequent and
//!   travel as [`Error::Aborted`] carrying a typed [`AbortReason`].
//! - **Contract violations** (negative dependency counters, releasing a lock
//!   that was never taken, broken owner/waiter bookkeeping). These panic via
//!   assertions and are never represented here.

use crate::types::{Key, TxnId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a transaction attempt was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// A transaction we read dirty data from aborted
    Cascading,
    /// A lock wait or dependency wait exceeded its bound
    Timeout,
    /// A read observed at execution time is stale at commit
    ValidationFailed,
    /// A concurrent writer held a record we needed to lock at commit
    WriteNodeInterference,
    /// Admission to a lock queue was refused to avoid a wait cycle
    DeadlockAvoided,
    /// Exposed data was published out of dependency order
    DependencyOrder,
    /// The caller asked for the abort
    User,
}

impl AbortReason {
    /// All reasons, in metrics order
    pub const ALL: [AbortReason; 7] = [
        AbortReason::Cascading,
        AbortReason::Timeout,
        AbortReason::ValidationFailed,
        AbortReason::WriteNodeInterference,
        AbortReason::DeadlockAvoided,
        AbortReason::DependencyOrder,
        AbortReason::User,
    ];

    /// Stable name used in logs and metrics
    pub fn name(self) -> &'static str {
        match self {
            AbortReason::Cascading => "cascading",
            AbortReason::Timeout => "timeout",
            AbortReason::ValidationFailed => "validation_failed",
            AbortReason::WriteNodeInterference => "write_node_interference",
            AbortReason::DeadlockAvoided => "deadlock_avoided",
            AbortReason::DependencyOrder => "dependency_order",
            AbortReason::User => "user",
        }
    }

    /// Position in [`AbortReason::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors surfaced by the core crates
#[derive(Debug, Error)]
pub enum Error {
    /// The transaction attempt aborted and has been cleaned up
    #[error("{txn_id} aborted: {reason}")]
    Aborted {
        /// Attempt that aborted
        txn_id: TxnId,
        /// Typed cause
        reason: AbortReason,
    },

    /// Configuration was rejected at load time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error while loading configuration or policy files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration or policy file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Record does not exist
    #[error("key not found: {0}")]
    NotFound(Key),

    /// Operation not valid in the current transaction stage
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an abort error
    pub fn aborted(txn_id: TxnId, reason: AbortReason) -> Self {
        Error::Aborted { txn_id, reason }
    }

    /// Abort reason, if this is an abort
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Error::Aborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether a fresh attempt of the same transaction may succeed
    ///
    /// Every abort except a user-requested one is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.abort_reason(), Some(r) if r != AbortReason::User)
    }
}
