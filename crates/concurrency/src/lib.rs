//! Adaptive concurrency control for morphdb
//!
//! Every access a transaction makes is classified by a learned or preset
//! policy. The policy entry for the transaction's current state decides
//! whether the access locks its record, waits on earlier writers, reads
//! exposed uncommitted data, or publishes its own writes early.
//!
//! The moving parts:
//! - [`CcContext`]: configuration, encoder, policy table, tracker, metrics
//! - [`TransactionDescriptor`]: live, shared state of one attempt
//! - [`RecordLock`] / [`LockTable`]: per-record reader/writer lock managers
//!   with priority-ordered waiters and deadlock-avoiding admission
//! - [`DependencyTracker`]: who-waits-on-whom counters and optional graph
//! - [`ExposureTable`] / [`DependencyQueue`]: early visibility and the
//!   waits it induces
//! - [`TransactionManager`] / [`Transaction`]: execution, commit, retries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod deadlock;
pub mod dependency;
pub mod descriptor;
pub mod exposure;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod table;
pub mod transaction;
pub mod wait;

pub use config::{
    CcConfig, DeadlockStrategy, EncoderConfig, EncoderPreset, LockConfig, PolicySource,
    TrackingMode,
};
pub use context::CcContext;
pub use dependency::{DependencyState, DependencyTracker};
pub use descriptor::{TransactionDescriptor, TxnStage};
pub use exposure::{ExposedWrite, ExposureTable};
pub use lock::{LockMode, LockOutcome, RecordLock};
pub use manager::TransactionManager;
pub use metrics::{CcMetrics, MetricsSnapshot};
pub use table::LockTable;
pub use transaction::Transaction;
pub use wait::{Dependency, DependencyQueue};
