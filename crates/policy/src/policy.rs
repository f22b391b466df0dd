//! Policy entries
//!
//! A [`PolicyEntry`] is the rule for one encoded state: conflict-detection
//! strength ([`AccessMode`]), waiter rank, wait bound, per-type safeguards,
//! and whether the operation's writes are exposed before commit.
//!
//! The *expose* sub-policy governs how others treat data this operation
//! exposes. It defaults to "highest priority, same access/timeout", and for
//! commit-type operations it is replaced once, lazily, by the policy of the
//! transaction's next state (see `TransactionDescriptor::policy_with_lookahead`).

use crate::priority::WaitPriority;
use morph_core::TxnType;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conflict-detection strength of an operation
///
/// Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AccessMode {
    /// Detect nothing; read committed data, validate at commit
    NoDetect = 0,
    /// Read dirty data and track the writer as a dependency
    TrackDirty = 1,
    /// Wait for dependencies to pass their safeguard, then read dirty data
    Guarded = 2,
    /// Wait for all dependencies to finish and lock the record
    DetectAll = 3,
    /// Reserved predictive mode; executes as [`AccessMode::DetectAll`]
    Predict = 4,
}

impl AccessMode {
    /// Decode the numeric form used in policy files
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(AccessMode::NoDetect),
            1 => Some(AccessMode::TrackDirty),
            2 => Some(AccessMode::Guarded),
            3 => Some(AccessMode::DetectAll),
            4 => Some(AccessMode::Predict),
            _ => None,
        }
    }

    /// Whether the operation takes a record lock
    #[inline]
    pub fn needs_lock(self) -> bool {
        self >= AccessMode::DetectAll
    }

    /// Whether the operation waits on its dependency queue before running
    #[inline]
    pub fn waits_on_dependencies(self) -> bool {
        self >= AccessMode::Guarded
    }

    /// Whether reads may observe exposed, uncommitted data
    #[inline]
    pub fn reads_dirty(self) -> bool {
        self != AccessMode::NoDetect
    }

    /// Short label for policy dumps
    pub fn label(self) -> &'static str {
        match self {
            AccessMode::NoDetect => "NO DE",
            AccessMode::TrackDirty => "DIRTY",
            AccessMode::Guarded => "GUARD",
            AccessMode::DetectAll => "ALL",
            AccessMode::Predict => "PRED",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How others wait on data an operation exposed
#[derive(Debug, Clone, PartialEq)]
pub struct ExposePolicy {
    /// Detection strength applied by readers of the exposed data
    pub access: AccessMode,
    /// Rank used for waits on the exposed data
    pub priority: WaitPriority,
    /// Wait bound in microseconds (0 = unbounded)
    pub timeout_us: u32,
    /// Per-type safeguard step thresholds
    pub safeguard: Box<[u32]>,
}

/// Rule for one encoded state
#[derive(Debug, Clone)]
pub struct PolicyEntry {
    /// Conflict-detection strength
    pub access: AccessMode,
    /// Rank among lock waiters (higher admitted first)
    pub priority: WaitPriority,
    /// Wait bound in microseconds (0 = unbounded)
    pub timeout_us: u32,
    /// Publish writes before commit
    pub expose: bool,
    /// Per-type step thresholds for guarded waits
    pub safeguard: Box<[u32]>,
    default_expose: ExposePolicy,
    lookahead: OnceCell<ExposePolicy>,
}

impl PolicyEntry {
    /// Create an entry with zero safeguards for `txn_types` types
    pub fn new(
        access: AccessMode,
        priority: WaitPriority,
        expose: bool,
        timeout_us: u32,
        txn_types: usize,
    ) -> Self {
        let safeguard = vec![0u32; txn_types].into_boxed_slice();
        Self {
            access,
            priority,
            timeout_us,
            expose,
            // Exposed data is assumed to commit, so waits on it rank highest.
            default_expose: ExposePolicy {
                access,
                priority: WaitPriority::HIGHEST,
                timeout_us,
                safeguard: safeguard.clone(),
            },
            safeguard,
            lookahead: OnceCell::new(),
        }
    }

    /// Replace the safeguard vector
    pub fn with_safeguard(mut self, safeguard: Vec<u32>) -> Self {
        self.safeguard = safeguard.into_boxed_slice();
        self.default_expose.safeguard = self.safeguard.clone();
        self
    }

    /// Safeguard threshold for a dependency of type `txn_type`
    ///
    /// Types beyond the table's arity have no safeguard (0).
    pub fn safeguard_for(&self, txn_type: TxnType) -> u32 {
        self.safeguard.get(txn_type.index()).copied().unwrap_or(0)
    }

    /// This entry's own wait rule, in expose form
    pub fn as_expose(&self) -> ExposePolicy {
        ExposePolicy {
            access: self.access,
            priority: self.priority,
            timeout_us: self.timeout_us,
            safeguard: self.safeguard.clone(),
        }
    }

    /// Current expose sub-policy: the lookahead result if computed, else the default
    pub fn expose_policy(&self) -> &ExposePolicy {
        self.lookahead.get().unwrap_or(&self.default_expose)
    }

    /// Whether the lookahead expose policy has been computed
    pub fn has_lookahead(&self) -> bool {
        self.lookahead.get().is_some()
    }

    /// Compute the lookahead expose policy at most once
    ///
    /// Concurrent callers race to initialize; exactly one closure result wins
    /// and every caller observes it.
    pub fn expose_policy_or_init<F>(&self, init: F) -> &ExposePolicy
    where
        F: FnOnce() -> ExposePolicy,
    {
        self.lookahead.get_or_init(init)
    }
}
