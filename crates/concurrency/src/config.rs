//! Concurrency-control configuration
//!
//! Loaded from TOML; every field has a default so an empty file yields a
//! working two-phase-locking setup with one transaction type.
//!
//! ```toml
//! encoder = "step"                  # or { kinds = [...], caps = [...] }
//! policy = { preset = "2pl" }       # or { file = "policy.toml" }
//! tracking = "counting"             # or "full_graph"
//! retry_times = 3
//! dependency_wait_timeout_us = 100000
//! backoff_base_us = 0
//!
//! [workload]
//! access_counts = [10, 4]
//!
//! [lock]
//! deadlock = "wait_die"             # cautious_wait | bitmap | dependency_graph
//! real_time_priority = false
//! passive_wait_only = false
//! ```

use morph_core::{Error, Result};
use morph_policy::{EncoderSpec, PolicyPreset, WorkloadProfile, MAX_STATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

mod defaults {
    pub fn retry_times() -> usize {
        3
    }
    pub fn dependency_wait_timeout_us() -> u32 {
        100_000
    }
}

/// Named encoder layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderPreset {
    /// Transaction type and op count, both linear
    Step,
}

/// Encoder selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncoderConfig {
    /// Built-in layout
    Preset(EncoderPreset),
    /// Explicit per-feature kinds and caps
    Explicit(EncoderSpec),
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig::Preset(EncoderPreset::Step)
    }
}

impl EncoderConfig {
    /// Resolve into a concrete spec for `txn_types` transaction types
    ///
    /// The step layout gives every type an equal share of the table.
    pub fn resolve(&self, txn_types: usize) -> EncoderSpec {
        match self {
            EncoderConfig::Preset(EncoderPreset::Step) => {
                let types = txn_types.max(1) as u32;
                EncoderSpec::step(types, (MAX_STATE as u32 / types).max(1))
            }
            EncoderConfig::Explicit(spec) => spec.clone(),
        }
    }
}

/// Where the policy table comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    /// Fill every state with a preset entry
    Preset(PolicyPreset),
    /// Load a policy file
    File(PathBuf),
}

impl Default for PolicySource {
    fn default() -> Self {
        PolicySource::Preset(PolicyPreset::TwoPhaseLocking)
    }
}

/// Admission check used on the unsorted wait path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlockStrategy {
    /// Younger requesters never wait on older owners
    #[default]
    WaitDie,
    /// Never wait on a transaction that is itself blocked
    CautiousWait,
    /// Hashed reachability bits
    Bitmap,
    /// Exact reachability; requires full-graph tracking
    DependencyGraph,
}

/// How dependency edges are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// In/out degree counters only
    #[default]
    Counting,
    /// Explicit edge sets plus transitive reach
    FullGraph,
}

/// Record-lock behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Admission check for unsorted waits
    pub deadlock: DeadlockStrategy,
    /// Append waiters FIFO and promote by live descriptor priority
    pub real_time_priority: bool,
    /// Skip owner-to-waiter edges on immediate grants
    pub passive_wait_only: bool,
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcConfig {
    /// State encoder layout
    #[serde(default)]
    pub encoder: EncoderConfig,
    /// Policy table source
    #[serde(default)]
    pub policy: PolicySource,
    /// Transaction types and their lengths
    #[serde(default)]
    pub workload: WorkloadProfile,
    /// Record-lock behavior
    #[serde(default)]
    pub lock: LockConfig,
    /// Dependency bookkeeping
    #[serde(default)]
    pub tracking: TrackingMode,
    /// Retries after a retryable abort
    #[serde(default = "defaults::retry_times")]
    pub retry_times: usize,
    /// Bound on the commit-time dependency drain (0 = unbounded)
    #[serde(default = "defaults::dependency_wait_timeout_us")]
    pub dependency_wait_timeout_us: u32,
    /// Linear backoff step when the policy carries no learned schedule
    #[serde(default)]
    pub backoff_base_us: u64,
}

impl Default for CcConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            policy: PolicySource::default(),
            workload: WorkloadProfile::default(),
            lock: LockConfig::default(),
            tracking: TrackingMode::default(),
            retry_times: defaults::retry_times(),
            dependency_wait_timeout_us: defaults::dependency_wait_timeout_us(),
            backoff_base_us: 0,
        }
    }
}

impl CcConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CcConfig =
            toml::from_str(text).map_err(|e| Error::Parse(format!("cc config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    ///
    /// A relative policy file path is resolved against the config file's
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let PolicySource::File(policy) = &mut config.policy {
            if policy.is_relative() {
                if let Some(dir) = path.parent() {
                    *policy = dir.join(&*policy);
                }
            }
        }
        info!(path = %path.display(), "Loaded cc config");
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.workload.txn_types() == 0 {
            return Err(Error::InvalidConfig(
                "workload must declare at least one transaction type".to_string(),
            ));
        }
        if self.lock.deadlock == DeadlockStrategy::DependencyGraph
            && self.tracking != TrackingMode::FullGraph
        {
            return Err(Error::InvalidConfig(
                "dependency_graph deadlock check requires full_graph tracking".to_string(),
            ));
        }
        Ok(())
    }

    /// Use a preset policy
    pub fn with_preset(mut self, preset: PolicyPreset) -> Self {
        self.policy = PolicySource::Preset(preset);
        self
    }

    /// Use an explicit encoder spec
    pub fn with_encoder(mut self, spec: EncoderSpec) -> Self {
        self.encoder = EncoderConfig::Explicit(spec);
        self
    }

    /// Set the deadlock admission check
    pub fn with_deadlock(mut self, strategy: DeadlockStrategy) -> Self {
        self.lock.deadlock = strategy;
        self
    }

    /// Set the dependency tracking mode
    pub fn with_tracking(mut self, tracking: TrackingMode) -> Self {
        self.tracking = tracking;
        self
    }

    /// Set the workload profile
    pub fn with_workload(mut self, workload: WorkloadProfile) -> Self {
        self.workload = workload;
        self
    }
}
