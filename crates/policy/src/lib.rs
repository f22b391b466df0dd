//! Concurrency-control policies for morphdb
//!
//! A policy is a lookup table indexed by an integer *state*. Each entry says
//! how strongly an operation detects conflicts, how it ranks among lock
//! waiters, how long it may block, and whether its writes become visible
//! before commit. The [`StateEncoder`] turns a transaction's live features
//! into that state index.
//!
//! ```text
//! features[6] ──StateEncoder::encode──▶ state ──PolicyTable::lookup──▶ &PolicyEntry
//! ```
//!
//! Tables are built once at startup (preset or file) and shared read-only.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod encoder;
pub mod policy;
pub mod priority;
pub mod table;
pub mod workload;

pub use backoff::{BackoffAction, BackoffSchedule, RETRY_TIMES};
pub use encoder::{EncoderSpec, EncodingKind, Feature, FeatureVector, StateEncoder, N_FEATURES};
pub use policy::{AccessMode, ExposePolicy, PolicyEntry};
pub use priority::{WaitPriority, PRIORITY_EPSILON};
pub use table::{PolicyPreset, PolicyTable, DEFAULT_TIMEOUT_US, MAX_STATE};
pub use workload::WorkloadProfile;
