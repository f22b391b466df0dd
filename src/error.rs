//! Unified error types for morphdb.
//!
//! This module wraps the internal crates' errors in one stable enum.

use morph_core::{AbortReason, TxnId};
use thiserror::Error;

/// All morphdb errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The transaction attempt aborted and released everything it held
    #[error("{txn_id} aborted: {reason}")]
    Aborted {
        /// Attempt that aborted
        txn_id: TxnId,
        /// Typed cause
        reason: AbortReason,
    },

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration or policy was rejected
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not valid for the transaction's current stage
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for morphdb operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if a fresh attempt may succeed.
    ///
    /// Every abort except a user-requested one is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Aborted { reason, .. } if *reason != AbortReason::User)
    }

    /// Abort reason, if this is an abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Error::Aborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

// Convert from internal core errors
impl From<morph_core::Error> for Error {
    fn from(e: morph_core::Error) -> Self {
        use morph_core::Error as CoreError;
        match e {
            CoreError::Aborted { txn_id, reason } => Error::Aborted { txn_id, reason },
            CoreError::InvalidConfig(msg) => Error::Config(msg),
            CoreError::Parse(msg) => Error::Config(format!("parse: {}", msg)),
            CoreError::Io(io_err) => Error::Io(io_err),
            CoreError::NotFound(key) => Error::NotFound(key.to_string()),
            CoreError::InvalidState(msg) => Error::InvalidState(msg),
        }
    }
}
