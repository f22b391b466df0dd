//! Retry backoff schedule
//!
//! A learned policy may carry two delay tables indexed by
//! `[retry][txn_type]`: one applied after an abort (increase) and one after a
//! successful commit (decrease). Retries beyond the table reuse its last row.

use morph_core::TxnType;
use serde::{Deserialize, Serialize};

/// Number of retry rows a learned schedule carries
pub const RETRY_TIMES: usize = 3;

/// What to do with a transaction type's running backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffAction {
    /// Grow the backoff by this many microseconds
    Increase(f64),
    /// Shrink the backoff by this many microseconds
    Decrease(f64),
    /// Leave it unchanged
    Hold,
}

/// Learned backoff tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    /// Delay growth after an abort, `[retry][txn_type]`
    #[serde(default)]
    pub increase: Vec<Vec<f64>>,
    /// Delay reduction after a commit, `[retry][txn_type]`
    #[serde(default)]
    pub decrease: Vec<Vec<f64>>,
}

impl BackoffSchedule {
    /// Whether the schedule carries learned values
    pub fn is_learned(&self) -> bool {
        !self.increase.is_empty() || !self.decrease.is_empty()
    }

    /// Action after attempt number `retry` of a `txn_type` transaction
    pub fn action(&self, commit_success: bool, retry: usize, txn_type: TxnType) -> BackoffAction {
        let table = if commit_success {
            &self.decrease
        } else {
            &self.increase
        };
        let Some(row) = table.get(retry.min(RETRY_TIMES - 1)).or_else(|| table.last()) else {
            return BackoffAction::Hold;
        };
        match row.get(txn_type.index()) {
            Some(&delta) if commit_success => BackoffAction::Decrease(delta),
            Some(&delta) => BackoffAction::Increase(delta),
            None => BackoffAction::Hold,
        }
    }

    /// Check table shapes against the number of transaction types
    pub fn validate(&self, txn_types: usize) -> Result<(), String> {
        for (name, table) in [("increase", &self.increase), ("decrease", &self.decrease)] {
            if table.len() > RETRY_TIMES {
                return Err(format!(
                    "backoff.{} has {} rows, at most {} allowed",
                    name,
                    table.len(),
                    RETRY_TIMES
                ));
            }
            for row in table {
                if row.len() != txn_types {
                    return Err(format!(
                        "backoff.{} row has {} entries, expected {}",
                        name,
                        row.len(),
                        txn_types
                    ));
                }
                if row.iter().any(|v| !v.is_finite() || *v < 0.0) {
                    return Err(format!("backoff.{} contains a negative or non-finite delay", name));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learned() -> BackoffSchedule {
        BackoffSchedule {
            increase: vec![vec![10.0, 20.0], vec![30.0, 40.0], vec![50.0, 60.0]],
            decrease: vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
        }
    }

    #[test]
    fn test_empty_schedule_holds() {
        let schedule = BackoffSchedule::default();
        assert!(!schedule.is_learned());
        assert_eq!(schedule.action(false, 0, TxnType(0)), BackoffAction::Hold);
        assert_eq!(schedule.action(true, 5, TxnType(0)), BackoffAction::Hold);
    }

    #[test]
    fn test_learned_lookup() {
        let schedule = learned();
        assert_eq!(schedule.action(false, 0, TxnType(1)), BackoffAction::Increase(20.0));
        assert_eq!(schedule.action(true, 1, TxnType(0)), BackoffAction::Decrease(3.0));
    }

    #[test]
    fn test_retry_clamped_to_last_row() {
        let schedule = learned();
        assert_eq!(schedule.action(false, 9, TxnType(0)), BackoffAction::Increase(50.0));
    }

    #[test]
    fn test_unknown_type_holds() {
        assert_eq!(learned().action(false, 0, TxnType(4)), BackoffAction::Hold);
    }

    #[test]
    fn test_validate_shapes() {
        assert!(learned().validate(2).is_ok());
        assert!(learned().validate(3).is_err());

        let mut too_many = learned();
        too_many.increase.push(vec![0.0, 0.0]);
        assert!(too_many.validate(2).is_err());

        let mut negative = learned();
        negative.decrease[0][0] = -1.0;
        assert!(negative.validate(2).is_err());
    }
}
