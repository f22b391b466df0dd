//! # morphdb
//!
//! In-memory transactional key/value store with adaptive, policy-driven
//! concurrency control.
//!
//! Instead of committing to one protocol, every access a transaction makes
//! is classified by a policy table indexed by the transaction's live state
//! (its type, progress, and how many others it waits on or blocks). The
//! chosen entry decides whether the access locks, waits on earlier writers,
//! reads exposed uncommitted data, or exposes its own writes early. Presets
//! reproduce two-phase locking, optimistic execution and pipelined
//! execution; learned tables mix them per state.
//!
//! ## Quick Start
//!
//! ```ignore
//! use morphdb::prelude::*;
//!
//! let db = Database::ephemeral()?;
//! db.run(TxnType(0), |txn| {
//!     let seen = txn.read(&Key::from("counter"))?;
//!     txn.write(Key::from("counter"), bump(seen))
//! })?;
//! println!("{:?}", db.metrics());
//! ```
//!
//! ## Layers
//!
//! - [`morph_core`] - ids, keys, the storage trait, errors
//! - [`morph_policy`] - priorities, policy entries and tables, state encoder
//! - [`morph_storage`] - sharded in-memory committed-data store
//! - [`morph_concurrency`] - descriptors, record locks, dependency tracking,
//!   transactions and the manager

#![warn(missing_docs)]

mod database;
mod error;
mod types;

pub mod prelude;

// Re-export main entry points
pub use database::{Database, DatabaseBuilder, DatabaseMetrics};
pub use error::{Error, Result};

// Re-export types
pub use types::*;

// Layer crates, for callers that need the full surface
pub use morph_concurrency;
pub use morph_core;
pub use morph_policy;
pub use morph_storage;
