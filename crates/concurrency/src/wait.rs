//! Per-transaction dependency queue
//!
//! Writers a transaction read exposed data from (or otherwise has to wait
//! for) are queued here. Each queued writer also carries one
//! `writer -> reader` edge in the dependency tracker, removed when the
//! reader finishes. Waiting is busy polling on the writers' descriptors.

use crate::descriptor::{TransactionDescriptor, TxnStage};
use morph_core::{AbortReason, TxnId};
use morph_policy::AccessMode;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One writer we depend on
#[derive(Debug, Clone)]
pub struct Dependency {
    /// Transaction we wait for
    pub writer: Arc<TransactionDescriptor>,
    /// We observed the writer's uncommitted data
    pub dirty_read: bool,
}

/// Writers a transaction depends on
#[derive(Debug, Default)]
pub struct DependencyQueue {
    entries: Vec<Dependency>,
}

impl DependencyQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `writer` as a dependency of `reader`
    ///
    /// A writer already queued only has its dirty-read flag widened.
    pub fn record(
        &mut self,
        reader: &Arc<TransactionDescriptor>,
        writer: &Arc<TransactionDescriptor>,
        dirty_read: bool,
    ) {
        if writer.id() == reader.id() {
            return;
        }
        if let Some(entry) = self.entries.iter_mut().find(|d| d.writer.id() == writer.id()) {
            entry.dirty_read |= dirty_read;
            return;
        }
        reader.context().tracker().add_edge(writer, reader);
        self.entries.push(Dependency {
            writer: Arc::clone(writer),
            dirty_read,
        });
    }

    /// Whether `txn` is queued
    pub fn contains(&self, txn: TxnId) -> bool {
        self.entries.iter().any(|d| d.writer.id() == txn)
    }

    /// Queued writers
    pub fn entries(&self) -> &[Dependency] {
        &self.entries
    }

    /// Number of queued writers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait until the queue satisfies `access`
    ///
    /// `NoDetect` and `TrackDirty` never wait. `Guarded` waits until every
    /// writer finished or has run more accesses than its type's safeguard.
    /// `DetectAll` and `Predict` wait until every writer finished. A
    /// `timeout_us` of zero waits without bound.
    ///
    /// # Errors
    ///
    /// `Cascading` when a writer we read dirty data from aborted, `Timeout`
    /// when the bound passes first.
    pub fn wait(&self, access: AccessMode, timeout_us: u32, safeguard: &[u32]) -> Result<(), AbortReason> {
        if !access.waits_on_dependencies() || self.entries.is_empty() {
            return Ok(());
        }
        let deadline =
            (timeout_us > 0).then(|| Instant::now() + Duration::from_micros(u64::from(timeout_us)));
        let mut spins = 0u32;
        loop {
            let mut pending = false;
            for dep in &self.entries {
                match dep.writer.stage() {
                    TxnStage::Aborted if dep.dirty_read => return Err(AbortReason::Cascading),
                    TxnStage::Aborted | TxnStage::Committed => {}
                    TxnStage::Active => {
                        let passed = access == AccessMode::Guarded && {
                            let bound = safeguard
                                .get(dep.writer.txn_type().index())
                                .copied()
                                .unwrap_or(0);
                            dep.writer.op_count() > bound
                        };
                        pending |= !passed;
                    }
                }
            }
            if !pending {
                return Ok(());
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(AbortReason::Timeout);
            }
            spins = spins.wrapping_add(1);
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Drop every dependency of `reader`, removing its tracker edges
    pub fn clear(&mut self, reader: &Arc<TransactionDescriptor>) {
        let tracker = reader.context().tracker();
        for dep in self.entries.drain(..) {
            tracker.remove_edge(&dep.writer, reader);
        }
    }
}
