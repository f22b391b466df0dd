//! Collaborator traits
//!
//! The concurrency layer never owns record data. It reads committed values
//! and installs new versions through [`Storage`], which the index/storage
//! engine implements.

use crate::types::{Key, VersionedValue};

/// Committed-data access used by the transaction executor
///
/// Implementations must be safe to call from many worker threads at once.
/// Only committed data flows through this trait; uncommitted writes live in
/// the transaction's write set or the exposure table.
pub trait Storage: Send + Sync {
    /// Latest committed version of `key`
    fn get(&self, key: &Key) -> Option<VersionedValue>;

    /// Install `value` as the committed state of `key` at `version`
    fn put(&self, key: Key, value: VersionedValue);

    /// Remove `key`, returning the previous committed value
    fn delete(&self, key: &Key) -> Option<VersionedValue>;

    /// Version of the latest committed write to `key` (0 when absent)
    fn version_of(&self, key: &Key) -> u64 {
        self.get(key).map(|v| v.version).unwrap_or(0)
    }
}
