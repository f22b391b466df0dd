//! Transaction execution
//!
//! A [`Transaction`] is one attempt, driven by a single thread. Every access
//! re-encodes the descriptor's features, looks up the policy for the
//! resulting state, and lets that entry decide how the access runs:
//!
//! | access        | waits on dependencies | record lock | reads exposed data |
//! |---------------|-----------------------|-------------|--------------------|
//! | `NoDetect`    | no                    | no          | no                 |
//! | `TrackDirty`  | no                    | no          | yes                |
//! | `Guarded`     | until safeguard       | no          | yes                |
//! | `DetectAll`   | until finished        | yes         | yes                |
//!
//! A dirty read takes no record lock: it is checked at commit against the
//! writer's installed value instead. Keys we already hold locked keep
//! reading committed data.
//!
//! Commit drains the dependency queue, locks the write set in key order,
//! validates reads, and installs the writes under one version.
//! Any failure aborts the attempt and releases everything it held.

use crate::descriptor::{TransactionDescriptor, TxnStage};
use crate::lock::{LockMode, LockOutcome};
use crate::manager::TransactionManager;
use crate::wait::DependencyQueue;
use morph_core::{AbortReason, Error, Key, OpKind, Result, TxnId, TxnType, VersionedValue};
use morph_policy::{AccessMode, WaitPriority, DEFAULT_TIMEOUT_US};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// How a read must be checked at commit
#[derive(Debug, Clone)]
enum ReadRecord {
    /// Read committed data at this version
    Committed(u64),
    /// Read `writer`'s exposed `value`
    Dirty {
        writer: Arc<TransactionDescriptor>,
        value: Vec<u8>,
    },
}

/// One attempt of a transaction
pub struct Transaction<'m> {
    manager: &'m TransactionManager,
    desc: Arc<TransactionDescriptor>,
    deps: DependencyQueue,
    reads: BTreeMap<Key, ReadRecord>,
    writes: BTreeMap<Key, Vec<u8>>,
    /// Keys with an owner or queued entry of ours, by requested mode
    locks: BTreeMap<Key, LockMode>,
    exposed: Vec<Key>,
    finished: bool,
}

impl<'m> Transaction<'m> {
    pub(crate) fn new(manager: &'m TransactionManager, id: TxnId, txn_type: TxnType) -> Self {
        let desc = TransactionDescriptor::new(id, txn_type, Arc::clone(manager.context()));
        trace!(txn_id = %id, %txn_type, "Transaction started");
        Self {
            manager,
            desc,
            deps: DependencyQueue::new(),
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            locks: BTreeMap::new(),
            exposed: Vec::new(),
            finished: false,
        }
    }

    /// Attempt id
    pub fn id(&self) -> TxnId {
        self.desc.id()
    }

    /// Shared descriptor of this attempt
    pub fn descriptor(&self) -> &Arc<TransactionDescriptor> {
        &self.desc
    }

    /// Writers this attempt currently depends on
    pub fn dependencies(&self) -> &DependencyQueue {
        &self.deps
    }

    /// Buffered writes
    pub fn write_set(&self) -> impl Iterator<Item = (&Key, &[u8])> {
        self.writes.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Whether the attempt has committed or aborted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn ensure_active(&self) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidState(format!(
                "{} is already {:?}",
                self.desc.id(),
                self.desc.stage()
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Accesses
    // ========================================================================

    /// Read `key`
    ///
    /// Returns our own buffered write if there is one. Otherwise the
    /// current policy decides between an exposed uncommitted value, a locked
    /// read of the latest committed value, and an unlocked committed read.
    pub fn read(&mut self, key: &Key) -> Result<Option<Vec<u8>>> {
        self.ensure_active()?;
        let desc = Arc::clone(&self.desc);
        desc.begin_op(OpKind::Read);
        let policy = desc.refresh_policy();

        if let Some(own) = self.writes.get(key) {
            return Ok(Some(own.clone()));
        }

        if let Err(reason) = self.deps.wait(policy.access, policy.timeout_us, &policy.safeguard) {
            return Err(self.fail(reason));
        }

        if policy.access.reads_dirty() && !self.locks.contains_key(key) {
            if let Some(exposed) = self.manager.exposure().read(key) {
                if exposed.writer.id() != desc.id() {
                    self.deps.record(&desc, &exposed.writer, true);
                    // An earlier committed read of the key stays the one validated.
                    self.reads
                        .entry(key.clone())
                        .or_insert_with(|| ReadRecord::Dirty {
                            writer: Arc::clone(&exposed.writer),
                            value: exposed.value.clone(),
                        });
                    trace!(txn_id = %desc.id(), writer = %exposed.writer.id(), %key, "Dirty read");
                    return Ok(Some(exposed.value));
                }
            }
        }

        if policy.access.needs_lock() {
            // Upgrades drop the shared hold, so locked reads validate too.
            self.lock(key, LockMode::Shared, policy.priority, policy.timeout_us)?;
        }

        let committed = self.manager.storage().get(key);
        let version = committed.as_ref().map_or(0, |v| v.version);
        self.reads
            .entry(key.clone())
            .or_insert(ReadRecord::Committed(version));
        Ok(committed.map(|v| v.value))
    }

    /// Buffer a write of `value` to `key`
    ///
    /// Under a policy with `expose` set, the value is also published to
    /// other transactions before commit. Otherwise any value we exposed
    /// earlier for `key` is withdrawn, since it will never be installed.
    pub fn write(&mut self, key: Key, value: Vec<u8>) -> Result<()> {
        self.ensure_active()?;
        let desc = Arc::clone(&self.desc);
        desc.begin_op(OpKind::Update);
        let policy = desc.refresh_policy();

        if let Err(reason) = self.deps.wait(policy.access, policy.timeout_us, &policy.safeguard) {
            return Err(self.fail(reason));
        }
        if policy.access.needs_lock() {
            self.lock(&key, LockMode::Exclusive, policy.priority, policy.timeout_us)?;
        }
        if policy.expose {
            self.expose(&key, &value)?;
        } else if let Some(pos) = self.exposed.iter().position(|k| *k == key) {
            self.manager.exposure().withdraw(&key, desc.id());
            self.exposed.swap_remove(pos);
            trace!(txn_id = %desc.id(), %key, "Stale exposure withdrawn");
        }
        self.writes.insert(key, value);
        Ok(())
    }

    /// Publish a buffered write early
    ///
    /// Runs as a commit-type piece: the expose policy comes from the state
    /// the next access will encode to.
    fn expose(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        let desc = Arc::clone(&self.desc);
        desc.set_current_op(OpKind::Commit);
        let expose = desc.policy_with_lookahead();
        let waited = self.deps.wait(expose.access, expose.timeout_us, &expose.safeguard);
        desc.set_current_op(OpKind::Update);
        if let Err(reason) = waited {
            return Err(self.fail(reason));
        }

        let deps = &self.deps;
        let published = self
            .manager
            .exposure()
            .publish(key, &desc, value.to_vec(), |id| deps.contains(id));
        if let Err(reason) = published {
            return Err(self.fail(reason));
        }
        if !self.exposed.contains(key) {
            self.exposed.push(key.clone());
        }
        trace!(txn_id = %desc.id(), %key, "Write exposed");
        Ok(())
    }

    /// Take `key` in `mode`, upgrading a shared hold by release and reacquire
    fn lock(&mut self, key: &Key, mode: LockMode, priority: WaitPriority, timeout_us: u32) -> Result<()> {
        match self.locks.get(key).copied() {
            Some(LockMode::Exclusive) => return Ok(()),
            Some(LockMode::Shared) if mode == LockMode::Shared => return Ok(()),
            Some(LockMode::Shared) => {
                self.manager.locks().release(key, &self.desc);
                self.locks.remove(key);
            }
            None => {}
        }

        match self
            .manager
            .locks()
            .acquire(key, mode, &self.desc, priority, timeout_us, true)
        {
            LockOutcome::Granted => {
                self.locks.insert(key.clone(), mode);
                Ok(())
            }
            LockOutcome::Refused => Err(self.fail(AbortReason::DeadlockAvoided)),
            LockOutcome::Pending => {
                // Still queued; the abort path releases the entry.
                self.locks.insert(key.clone(), mode);
                Err(self.fail(AbortReason::Timeout))
            }
        }
    }

    // ========================================================================
    // Commit / abort
    // ========================================================================

    /// Commit, returning the version the writes were installed at
    ///
    /// Read-only attempts commit at the current version without allocating
    /// a new one.
    pub fn commit(mut self) -> Result<u64> {
        self.ensure_active()?;
        let desc = Arc::clone(&self.desc);
        desc.set_current_op(OpKind::Commit);
        let policy = desc.refresh_policy();

        let drain_bound = self.manager.context().config().dependency_wait_timeout_us;
        if let Err(reason) = self.deps.wait(AccessMode::DetectAll, drain_bound, &[]) {
            return Err(self.fail(reason));
        }

        let lock_timeout = match policy.timeout_us {
            0 => DEFAULT_TIMEOUT_US,
            t => t,
        };
        let keys: Vec<Key> = self.writes.keys().cloned().collect();
        for key in &keys {
            if self.locks.get(key) == Some(&LockMode::Exclusive) {
                continue;
            }
            if self.locks.remove(key).is_some() {
                self.manager.locks().release(key, &desc);
            }
            let outcome = self.manager.locks().acquire(
                key,
                LockMode::Exclusive,
                &desc,
                WaitPriority::HIGHEST,
                lock_timeout,
                false,
            );
            if outcome != LockOutcome::Refused {
                self.locks.insert(key.clone(), LockMode::Exclusive);
            }
            if outcome != LockOutcome::Granted {
                return Err(self.fail(AbortReason::WriteNodeInterference));
            }
        }

        if let Some(key) = self.first_invalid_read() {
            debug!(txn_id = %desc.id(), %key, "Read validation failed");
            return Err(self.fail(AbortReason::ValidationFailed));
        }

        let version = if self.writes.is_empty() {
            self.manager.current_version()
        } else {
            let version = self.manager.allocate_version();
            let storage = self.manager.storage();
            for (key, value) in std::mem::take(&mut self.writes) {
                storage.put(key, VersionedValue::new(value, version));
            }
            version
        };
        desc.mark_committed(version);
        self.release_resources();
        self.manager.context().metrics().record_commit();
        trace!(txn_id = %desc.id(), version, "Transaction committed");
        Ok(version)
    }

    /// First read whose observation no longer holds
    fn first_invalid_read(&self) -> Option<&Key> {
        let storage = self.manager.storage();
        let id = self.desc.id();
        self.reads
            .iter()
            .find(|(key, record)| match record {
                ReadRecord::Committed(version) => {
                    storage.version_of(key) != *version
                        || !self.manager.locks().is_unmodified_for(key, id)
                }
                ReadRecord::Dirty { writer, value } => {
                    writer.stage() != TxnStage::Committed
                        || storage.get(key).map_or(true, |installed| {
                            installed.version != writer.commit_version()
                                || installed.value != *value
                        })
                }
            })
            .map(|(key, _)| key)
    }

    /// Abort at the caller's request
    pub fn abort(mut self) -> Result<()> {
        self.ensure_active()?;
        self.abort_with(AbortReason::User);
        Ok(())
    }

    /// Abort for `reason` and build the error to return
    fn fail(&mut self, reason: AbortReason) -> Error {
        self.abort_with(reason);
        Error::aborted(self.desc.id(), reason)
    }

    fn abort_with(&mut self, reason: AbortReason) {
        // Stage first, so dirty readers cascade before our locks open up.
        self.desc.mark_aborted();
        self.writes.clear();
        self.release_resources();
        self.manager.context().metrics().record_abort(reason);
        debug!(
            txn_id = %self.desc.id(),
            txn_type = %self.desc.txn_type(),
            %reason,
            op_count = self.desc.op_count(),
            "Transaction aborted"
        );
    }

    fn release_resources(&mut self) {
        let locks = std::mem::take(&mut self.locks);
        self.manager.locks().release_all(&self.desc, locks.keys());
        for key in self.exposed.drain(..) {
            self.manager.exposure().withdraw(&key, self.desc.id());
        }
        self.deps.clear(&self.desc);
        self.reads.clear();
        self.finished = true;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.abort_with(AbortReason::User);
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("desc", &self.desc)
            .field("reads", &self.reads.len())
            .field("writes", &self.writes.len())
            .field("locks", &self.locks.len())
            .field("finished", &self.finished)
            .finish()
    }
}
