//! Convenient imports for morphdb.
//!
//! This module re-exports the most commonly used types so you can get started
//! with a single import:
//!
//! ```ignore
//! use morphdb::prelude::*;
//!
//! let db = Database::ephemeral()?;
//! ```

// Main entry point
pub use crate::database::{Database, DatabaseBuilder, DatabaseMetrics};

// Error handling
pub use crate::error::{Error, Result};

// Core types
pub use crate::types::{AbortReason, Key, TxnId, TxnType};

// Configuration
pub use crate::types::{
    CcConfig, DeadlockStrategy, PolicyPreset, PolicyTable, TrackingMode, WorkloadProfile,
};

// Transactions
pub use crate::types::Transaction;
