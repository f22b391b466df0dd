//! Core types for morphdb
//!
//! This crate defines the vocabulary shared by every other layer:
//! - Transaction identity: [`TxnId`], [`TxnType`], [`OpKind`]
//! - Record identity and payloads: [`Key`], [`VersionedValue`]
//! - The [`Storage`] collaborator trait the concurrency layer calls into
//! - The error taxonomy: [`Error`] and the typed [`AbortReason`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AbortReason, Error, Result};
pub use traits::Storage;
pub use types::{Key, OpKind, TxnId, TxnType, VersionedValue};
