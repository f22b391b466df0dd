//! Engine context
//!
//! Everything a transaction or record lock needs that is fixed for the
//! lifetime of the engine: the encoder, the policy table, the dependency
//! tracker, and the shared counters. Built once and handed around as
//! `Arc<CcContext>`.

use crate::config::{CcConfig, LockConfig, PolicySource};
use crate::dependency::DependencyTracker;
use crate::metrics::CcMetrics;
use morph_core::{Error, Result};
use morph_policy::{PolicyTable, StateEncoder, WorkloadProfile};
use tracing::info;

/// Shared, read-mostly engine state
#[derive(Debug)]
pub struct CcContext {
    config: CcConfig,
    encoder: StateEncoder,
    policy: PolicyTable,
    tracker: DependencyTracker,
    metrics: CcMetrics,
}

impl CcContext {
    /// Validate `config`, configure the encoder, and build the policy table
    pub fn new(config: CcConfig) -> Result<Self> {
        config.validate()?;
        let txn_types = config.workload.txn_types();
        let policy = match &config.policy {
            PolicySource::Preset(preset) => PolicyTable::preset(*preset, txn_types),
            PolicySource::File(path) => PolicyTable::load(path, txn_types)?,
        };
        Self::with_policy(config, policy)
    }

    /// Build around an already constructed policy table
    pub fn with_policy(config: CcConfig, policy: PolicyTable) -> Result<Self> {
        config.validate()?;
        let spec = config.encoder.resolve(config.workload.txn_types());
        let encoder = StateEncoder::configure(&spec)?;
        if encoder.max_state() as usize > policy.len() {
            return Err(Error::InvalidConfig(format!(
                "encoder produces {} states but policy {} has only {}",
                encoder.max_state(),
                policy.name(),
                policy.len()
            )));
        }
        info!(
            policy = policy.name(),
            encoder = %encoder,
            tracking = ?config.tracking,
            deadlock = ?config.lock.deadlock,
            "Concurrency control configured"
        );
        Ok(Self {
            tracker: DependencyTracker::new(config.tracking, config.lock.deadlock),
            metrics: CcMetrics::new(encoder.max_state() as usize),
            config,
            encoder,
            policy,
        })
    }

    /// Configuration this context was built from
    pub fn config(&self) -> &CcConfig {
        &self.config
    }

    /// Feature encoder
    #[inline]
    pub fn encoder(&self) -> &StateEncoder {
        &self.encoder
    }

    /// Policy table
    #[inline]
    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    /// Dependency tracker
    #[inline]
    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    /// Shared counters
    #[inline]
    pub fn metrics(&self) -> &CcMetrics {
        &self.metrics
    }

    /// Record-lock behavior
    #[inline]
    pub fn lock_config(&self) -> &LockConfig {
        &self.config.lock
    }

    /// Workload shape
    pub fn workload(&self) -> &WorkloadProfile {
        &self.config.workload
    }
}
