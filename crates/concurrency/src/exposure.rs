//! Exposed uncommitted writes
//!
//! A write whose policy sets `expose` is published here before its
//! transaction commits, so that readers with a dirty-reading access mode can
//! pick it up and track the writer as a dependency. Each key holds at most
//! one exposed write; it is withdrawn when the writer commits or aborts.

use crate::descriptor::TransactionDescriptor;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use morph_core::{AbortReason, Key, TxnId};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use tracing::trace;

/// One published write
#[derive(Debug, Clone)]
pub struct ExposedWrite {
    /// Transaction that produced the value
    pub writer: Arc<TransactionDescriptor>,
    /// Uncommitted value
    pub value: Vec<u8>,
}

/// Per-key slots of exposed writes
#[derive(Debug, Default)]
pub struct ExposureTable {
    slots: DashMap<Key, ExposedWrite, BuildHasherDefault<FxHasher>>,
}

impl ExposureTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` for `key` on behalf of `writer`
    ///
    /// The slot may be taken over when it is empty, already ours, held by a
    /// finished writer, or held by a writer `depends_on` says we already
    /// wait for. Any other active writer means two exposures would race out
    /// of dependency order, and the publish is refused.
    pub fn publish(
        &self,
        key: &Key,
        writer: &Arc<TransactionDescriptor>,
        value: Vec<u8>,
        depends_on: impl Fn(TxnId) -> bool,
    ) -> Result<(), AbortReason> {
        let exposed = ExposedWrite {
            writer: Arc::clone(writer),
            value,
        };
        match self.slots.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(exposed);
            }
            Entry::Occupied(mut slot) => {
                let current = &slot.get().writer;
                let replaceable = current.id() == writer.id()
                    || !current.is_active()
                    || depends_on(current.id());
                if !replaceable {
                    trace!(
                        txn_id = %writer.id(),
                        holder = %current.id(),
                        %key,
                        "Exposure refused"
                    );
                    return Err(AbortReason::DependencyOrder);
                }
                slot.insert(exposed);
            }
        }
        Ok(())
    }

    /// Exposed write for `key`, ignoring writers that aborted
    pub fn read(&self, key: &Key) -> Option<ExposedWrite> {
        let slot = self.slots.get(key)?;
        if slot.writer.is_aborted() {
            return None;
        }
        Some(slot.value().clone())
    }

    /// Remove `writer`'s exposure of `key`, if the slot is still theirs
    pub fn withdraw(&self, key: &Key, writer: TxnId) -> bool {
        self.slots
            .remove_if(key, |_, exposed| exposed.writer.id() == writer)
            .is_some()
    }

    /// Number of keys with an exposed write
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is exposed
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
