//! Wait priorities
//!
//! Priorities are floats in `[0, 1]`; a higher value is admitted first.
//! Comparisons are epsilon-tolerant so that two priorities learned as "the
//! same" but differing in the last bits do not reorder waiters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Two priorities closer than this are equal
pub const PRIORITY_EPSILON: f64 = 1e-8;

/// Rank of a lock request among waiters
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitPriority(f64);

impl WaitPriority {
    /// Lowest rank; every other waiter goes first
    pub const LOWEST: WaitPriority = WaitPriority(0.0);

    /// Highest rank; used for commit-time locking and default exposure
    pub const HIGHEST: WaitPriority = WaitPriority(1.0);

    /// Create a priority, clamping into `[0, 1]`
    ///
    /// NaN maps to [`WaitPriority::LOWEST`].
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::LOWEST;
        }
        WaitPriority(value.clamp(0.0, 1.0))
    }

    /// Raw value
    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Strictly higher priority than `other`, beyond epsilon
    #[inline]
    pub fn is_prior(self, other: WaitPriority) -> bool {
        self.0 >= other.0 + PRIORITY_EPSILON
    }

    /// Higher than or equal to `other` within epsilon
    #[inline]
    pub fn is_prior_or_eq(self, other: WaitPriority) -> bool {
        self.is_prior(other) || self.approx_eq(other)
    }

    /// Equal within epsilon
    #[inline]
    pub fn approx_eq(self, other: WaitPriority) -> bool {
        (self.0 - other.0).abs() < PRIORITY_EPSILON
    }
}

impl fmt::Display for WaitPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
