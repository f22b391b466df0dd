//! Core types for the transactional store
//!
//! This module defines the fundamental types used throughout the system:
//! - [`TxnId`]: Monotonic transaction identifier (also the wait-die age)
//! - [`TxnType`]: Zero-based transaction type index
//! - [`OpKind`]: Kind of the operation a transaction is executing
//! - [`Key`]: Record identity, ordered so commit can lock deterministically
//! - [`VersionedValue`]: A committed value plus its commit version

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a transaction attempt
///
/// Identifiers are handed out monotonically by the transaction manager, so a
/// smaller id always means an older attempt. Retries get a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Raw numeric value
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this transaction started before `other`
    ///
    /// # Examples
    ///
    /// ```
    /// use morph_core::TxnId;
    ///
    /// assert!(TxnId(3).is_older_than(TxnId(5)));
    /// assert!(!TxnId(9).is_older_than(TxnId(5)));
    /// ```
    #[inline]
    pub fn is_older_than(self, other: TxnId) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Zero-based transaction type
///
/// Workloads declare a fixed number of transaction types (e.g. new-order,
/// payment, delivery). Per-type policy data such as safeguards is indexed by
/// this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TxnType(pub u16);

impl TxnType {
    /// Index into per-type tables
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TxnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Kind of the operation a transaction is currently executing
///
/// The discriminant is the value fed to the "current op" encoder feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpKind {
    /// Point read
    Read = 0,
    /// Update of an existing record
    Update = 1,
    /// Commit of the transaction
    Commit = 2,
    /// Insert of a new record
    Insert = 3,
    /// Range scan
    Scan = 4,
    /// No operation started yet
    #[default]
    None = 5,
}

impl OpKind {
    /// Encoder feature value for this kind
    #[inline]
    pub fn feature(self) -> u32 {
        self as u32
    }

    /// Decode a kind stored as its discriminant
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => OpKind::Read,
            1 => OpKind::Update,
            2 => OpKind::Commit,
            3 => OpKind::Insert,
            4 => OpKind::Scan,
            _ => OpKind::None,
        }
    }

    /// Whether the operation modifies data
    pub fn is_write(self) -> bool {
        matches!(self, OpKind::Update | OpKind::Insert)
    }
}

/// Record identity
///
/// Keys are opaque bytes. Their total order is the deterministic lock
/// acquisition order used at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Create a key from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// Raw bytes of the key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into_bytes())
    }
}

impl From<u64> for Key {
    /// Big-endian so numeric order matches byte order
    fn from(v: u64) -> Self {
        Key(v.to_be_bytes().to_vec())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Committed value with the version that installed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// Payload bytes
    pub value: Vec<u8>,
    /// Commit version that wrote this value
    pub version: u64,
}

impl VersionedValue {
    /// Create a new versioned value
    pub fn new(value: impl Into<Vec<u8>>, version: u64) -> Self {
        Self {
            value: value.into(),
            version,
        }
    }
}
