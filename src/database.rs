//! Main database entry point for morphdb.
//!
//! This module provides the `Database` struct, the primary entry point for
//! running transactions over an in-memory store.

use crate::error::Result;
use morph_concurrency::{
    CcConfig, CcContext, DeadlockStrategy, MetricsSnapshot, Transaction, TrackingMode,
    TransactionManager,
};
use morph_core::{AbortReason, Key, TxnType};
use morph_policy::{EncoderSpec, PolicyPreset, PolicyTable, WorkloadProfile};
use morph_storage::ShardedStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// The morphdb database.
///
/// Create a database using [`Database::open`], [`Database::ephemeral`] or
/// [`Database::builder`].
///
/// # Example
///
/// ```ignore
/// use morphdb::prelude::*;
///
/// let db = Database::builder()
///     .policy_preset(PolicyPreset::Pipelined)
///     .open()?;
///
/// db.run(TxnType(0), |txn| {
///     let balance = txn.read(&Key::from("acct:1"))?;
///     txn.write(Key::from("acct:1"), next(balance))
/// })?;
/// ```
pub struct Database {
    store: Arc<ShardedStore>,
    manager: TransactionManager,
}

impl Database {
    /// Open a database configured by the TOML file at `config_path`.
    ///
    /// A relative policy file path inside the config is resolved against the
    /// config file's directory.
    pub fn open(config_path: impl AsRef<Path>) -> Result<Self> {
        DatabaseBuilder::from_config_file(config_path)?.open()
    }

    /// Create a database with the default configuration.
    ///
    /// Two-phase-locking preset, one transaction type, wait-die admission.
    pub fn ephemeral() -> Result<Self> {
        Self::builder().open()
    }

    /// Create a builder for database configuration.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Start a single transaction attempt.
    ///
    /// The caller drives it with `read`/`write` and finishes it with
    /// `commit` or `abort`. Dropping it unfinished aborts it.
    pub fn transaction(&self, txn_type: TxnType) -> Result<Transaction<'_>> {
        Ok(self.manager.begin(txn_type)?)
    }

    /// Run `body` in a transaction and commit, retrying retryable aborts.
    pub fn run<T, F>(&self, txn_type: TxnType, body: F) -> Result<T>
    where
        F: FnMut(&mut Transaction<'_>) -> morph_core::Result<T>,
    {
        Ok(self.manager.run(txn_type, body)?)
    }

    /// Latest committed value of `key`, outside any transaction.
    pub fn get(&self, key: &Key) -> Option<Vec<u8>> {
        use morph_core::Storage;
        self.store.get(key).map(|v| v.value)
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no record has been committed.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Latest commit version.
    pub fn version(&self) -> u64 {
        self.manager.current_version()
    }

    /// Configuration the database was opened with.
    pub fn config(&self) -> &CcConfig {
        self.manager.context().config()
    }

    /// Policy table in use.
    pub fn policy(&self) -> &PolicyTable {
        self.manager.context().policy()
    }

    /// Underlying transaction manager.
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Get database metrics.
    pub fn metrics(&self) -> DatabaseMetrics {
        let snapshot = self.manager.context().metrics().snapshot();
        DatabaseMetrics {
            transactions_committed: snapshot.commits,
            transactions_aborted: snapshot.total_aborts,
            transactions_blocked: snapshot.blocked,
            commit_rate: snapshot.commit_rate(),
            deadlocks_avoided: snapshot.aborts_for(AbortReason::DeadlockAvoided),
            cascading_aborts: snapshot.aborts_for(AbortReason::Cascading),
            detail: snapshot,
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("records", &self.store.len())
            .field("manager", &self.manager)
            .finish()
    }
}

/// Database metrics.
#[derive(Debug, Clone)]
pub struct DatabaseMetrics {
    /// Total committed attempts
    pub transactions_committed: u64,
    /// Total aborted attempts
    pub transactions_aborted: u64,
    /// Attempts spinning in a lock wait right now
    pub transactions_blocked: u32,
    /// Commit success rate (0.0 - 1.0)
    pub commit_rate: f64,
    /// Lock waits refused by the deadlock check
    pub deadlocks_avoided: u64,
    /// Aborts caused by a dirty-read source aborting
    pub cascading_aborts: u64,
    /// Full counter snapshot
    pub detail: MetricsSnapshot,
}

/// Builder for database configuration.
///
/// # Example
///
/// ```ignore
/// // Learned policy with full dependency graph tracking
/// let db = Database::builder()
///     .workload(WorkloadProfile::with_access_counts(vec![12, 4, 20]))
///     .policy_file("./policies/tpcc.toml")
///     .tracking(TrackingMode::FullGraph)
///     .deadlock(DeadlockStrategy::DependencyGraph)
///     .open()?;
/// ```
#[derive(Debug, Default)]
pub struct DatabaseBuilder {
    config: CcConfig,
    policy: Option<PolicyTable>,
    initial_version: u64,
}

impl DatabaseBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a configuration file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new().config(CcConfig::load(path)?))
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: CcConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a built-in policy.
    pub fn policy_preset(mut self, preset: PolicyPreset) -> Self {
        self.config = self.config.with_preset(preset);
        self
    }

    /// Load the policy table from a TOML file at open.
    pub fn policy_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.policy = morph_concurrency::PolicySource::File(path.into());
        self
    }

    /// Use an already built policy table; overrides the configured source.
    pub fn policy(mut self, policy: PolicyTable) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Declare the transaction types and their lengths.
    pub fn workload(mut self, workload: WorkloadProfile) -> Self {
        self.config = self.config.with_workload(workload);
        self
    }

    /// Use an explicit state encoder layout.
    pub fn encoder(mut self, spec: EncoderSpec) -> Self {
        self.config = self.config.with_encoder(spec);
        self
    }

    /// Admission check for unsorted lock waits.
    pub fn deadlock(mut self, strategy: DeadlockStrategy) -> Self {
        self.config = self.config.with_deadlock(strategy);
        self
    }

    /// Dependency bookkeeping mode.
    pub fn tracking(mut self, tracking: TrackingMode) -> Self {
        self.config = self.config.with_tracking(tracking);
        self
    }

    /// Promote lock waiters by their live policy priority.
    pub fn real_time_priority(mut self, enabled: bool) -> Self {
        self.config.lock.real_time_priority = enabled;
        self
    }

    /// Retries after a retryable abort in [`Database::run`].
    pub fn retry_times(mut self, retries: usize) -> Self {
        self.config.retry_times = retries;
        self
    }

    /// Number the first commit `version + 1`.
    pub fn initial_version(mut self, version: u64) -> Self {
        self.initial_version = version;
        self
    }

    /// Open the database.
    pub fn open(self) -> Result<Database> {
        let ctx = match self.policy {
            Some(policy) => CcContext::with_policy(self.config, policy)?,
            None => CcContext::new(self.config)?,
        };
        let store = Arc::new(ShardedStore::new());
        let manager = TransactionManager::with_version(
            Arc::new(ctx),
            Arc::clone(&store) as Arc<dyn morph_core::Storage>,
            self.initial_version,
        );
        info!(
            policy = manager.context().policy().name(),
            txn_types = manager.context().workload().txn_types(),
            "Database opened"
        );
        Ok(Database { store, manager })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_ephemeral_round_trip() {
        let db = Database::ephemeral().unwrap();
        assert!(db.is_empty());
        db.run(TxnType(0), |txn| txn.write(Key::from("a"), b"1".to_vec()))
            .unwrap();
        assert_eq!(db.get(&Key::from("a")), Some(b"1".to_vec()));
        assert_eq!(db.version(), 1);
        assert_eq!(db.len(), 1);

        let metrics = db.metrics();
        assert_eq!(metrics.transactions_committed, 1);
        assert_eq!(metrics.transactions_aborted, 0);
        assert_eq!(metrics.commit_rate, 1.0);
    }

    #[test]
    fn test_builder_rejects_graph_check_without_graph() {
        let err = Database::builder()
            .deadlock(DeadlockStrategy::DependencyGraph)
            .open()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let db = Database::builder()
            .deadlock(DeadlockStrategy::DependencyGraph)
            .tracking(TrackingMode::FullGraph)
            .open()
            .unwrap();
        assert_eq!(db.config().tracking, TrackingMode::FullGraph);
    }

    #[test]
    fn test_manual_transaction_abort() {
        let db = Database::builder()
            .policy_preset(PolicyPreset::Optimistic)
            .initial_version(10)
            .open()
            .unwrap();
        let mut txn = db.transaction(TxnType(0)).unwrap();
        txn.write(Key::from("k"), b"v".to_vec()).unwrap();
        txn.abort().unwrap();
        assert!(db.get(&Key::from("k")).is_none());
        assert_eq!(db.metrics().detail.aborts_for(AbortReason::User), 1);

        let mut txn = db.transaction(TxnType(0)).unwrap();
        txn.write(Key::from("k"), b"v".to_vec()).unwrap();
        assert_eq!(txn.commit().unwrap(), 11);
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let db = Database::ephemeral().unwrap();
        assert!(matches!(db.transaction(TxnType(2)), Err(Error::Config(_))));
    }
}
