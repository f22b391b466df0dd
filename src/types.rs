//! Public types for the morphdb API.
//!
//! This module re-exports types from internal crates with a clean public interface.

// Identity and payload types
pub use morph_core::{AbortReason, Key, OpKind, TxnId, TxnType, VersionedValue};

// Policy types
pub use morph_policy::{
    AccessMode, BackoffSchedule, EncoderSpec, EncodingKind, PolicyEntry, PolicyPreset,
    PolicyTable, WaitPriority, WorkloadProfile,
};

// Concurrency-control configuration and observation
pub use morph_concurrency::{
    CcConfig, DeadlockStrategy, LockConfig, LockMode, MetricsSnapshot, PolicySource,
    Transaction, TrackingMode, TxnStage,
};
