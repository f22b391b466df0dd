//! Policy tables
//!
//! A [`PolicyTable`] holds one [`PolicyEntry`] per encoded state. It is
//! populated once, either from a built-in preset or from a policy file, and
//! is immutable afterwards, so lookups need no synchronization.
//!
//! ## Presets
//!
//! | Preset | Access | Priority | Expose | Timeout |
//! |--------|--------|----------|--------|---------|
//! | two-phase locking | DetectAll | lowest | no | 100ms |
//! | optimistic | NoDetect | lowest | no | 100ms |
//! | pipelined | TrackDirty | lowest | yes | 100ms |
//!
//! ## Policy file
//!
//! TOML with one value per state for each per-state column:
//!
//! ```toml
//! access = [3, 3, 0]            # AccessMode discriminants
//! priority = [0.5, 0.9, 0.0]
//! timeout = [1000, 1000, 0]     # microseconds, 0 = unbounded
//! expose = [false, true, false] # optional
//! safeguard = [[0, 2, 0]]       # optional, one row per transaction type
//! txn_buf_size = 32             # optional
//!
//! [backoff]                     # optional, [retry][txn_type] microseconds
//! increase = [[10.0]]
//! decrease = [[5.0]]
//! ```

use crate::backoff::BackoffSchedule;
use crate::policy::{AccessMode, PolicyEntry};
use crate::priority::WaitPriority;
use morph_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Fixed capacity of a policy table
pub const MAX_STATE: usize = 3000;

/// Default wait bound of the presets, in microseconds
pub const DEFAULT_TIMEOUT_US: u32 = 100_000;

const DEFAULT_TXN_BUF_SIZE: u32 = 32;

/// Built-in policies that fill every state with one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPreset {
    /// Lock everything, wait for all dependencies
    #[serde(alias = "2pl")]
    TwoPhaseLocking,
    /// Detect nothing, validate at commit
    #[serde(alias = "occ")]
    Optimistic,
    /// Read dirty data, expose writes early
    #[serde(alias = "pipe")]
    Pipelined,
}

impl PolicyPreset {
    /// Name used in logs
    pub fn name(self) -> &'static str {
        match self {
            PolicyPreset::TwoPhaseLocking => "two-phase-locking",
            PolicyPreset::Optimistic => "optimistic",
            PolicyPreset::Pipelined => "pipelined-execution",
        }
    }

    fn entry(self, txn_types: usize) -> PolicyEntry {
        let (access, expose) = match self {
            PolicyPreset::TwoPhaseLocking => (AccessMode::DetectAll, false),
            PolicyPreset::Optimistic => (AccessMode::NoDetect, false),
            PolicyPreset::Pipelined => (AccessMode::TrackDirty, true),
        };
        PolicyEntry::new(access, WaitPriority::LOWEST, expose, DEFAULT_TIMEOUT_US, txn_types)
    }
}

/// On-disk policy layout
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    access: Vec<u8>,
    priority: Vec<f64>,
    timeout: Vec<u32>,
    #[serde(default)]
    expose: Vec<bool>,
    #[serde(default)]
    safeguard: Vec<Vec<u32>>,
    #[serde(default)]
    txn_buf_size: Option<u32>,
    #[serde(default)]
    backoff: BackoffSchedule,
}

/// State-indexed policy lookup table
#[derive(Debug)]
pub struct PolicyTable {
    name: String,
    entries: Vec<PolicyEntry>,
    backoff: BackoffSchedule,
    txn_buf_size: u32,
}

impl PolicyTable {
    /// Fill all [`MAX_STATE`] states with a preset entry
    pub fn preset(preset: PolicyPreset, txn_types: usize) -> Self {
        let entry = preset.entry(txn_types);
        Self {
            name: preset.name().to_string(),
            entries: vec![entry; MAX_STATE],
            backoff: BackoffSchedule::default(),
            txn_buf_size: DEFAULT_TXN_BUF_SIZE,
        }
    }

    /// Build a table from explicit entries
    pub fn from_entries(name: impl Into<String>, entries: Vec<PolicyEntry>) -> Result<Self> {
        if entries.is_empty() || entries.len() > MAX_STATE {
            return Err(Error::InvalidConfig(format!(
                "policy table needs 1..={} entries, got {}",
                MAX_STATE,
                entries.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            entries,
            backoff: BackoffSchedule::default(),
            txn_buf_size: DEFAULT_TXN_BUF_SIZE,
        })
    }

    /// Attach a learned backoff schedule
    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    /// Load a policy file
    pub fn load(path: impl AsRef<Path>, txn_types: usize) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let table = Self::from_toml_str(&text, txn_types)?;
        info!(
            path = %path.display(),
            states = table.len(),
            "Loaded policy table"
        );
        Ok(Self {
            name: path.display().to_string(),
            ..table
        })
    }

    /// Parse policy file contents
    pub fn from_toml_str(text: &str, txn_types: usize) -> Result<Self> {
        let file: PolicyFile =
            toml::from_str(text).map_err(|e| Error::Parse(format!("policy file: {}", e)))?;
        let states = file.access.len();

        let column = |name: &str, len: usize| -> Result<()> {
            if len != states {
                return Err(Error::InvalidConfig(format!(
                    "policy column {} has {} values, access has {}",
                    name, len, states
                )));
            }
            Ok(())
        };
        column("priority", file.priority.len())?;
        column("timeout", file.timeout.len())?;
        if !file.expose.is_empty() {
            column("expose", file.expose.len())?;
        }
        if !file.safeguard.is_empty() {
            if file.safeguard.len() != txn_types {
                return Err(Error::InvalidConfig(format!(
                    "policy safeguard has {} rows, expected one per transaction type ({})",
                    file.safeguard.len(),
                    txn_types
                )));
            }
            for row in &file.safeguard {
                column("safeguard", row.len())?;
            }
        }
        file.backoff.validate(txn_types).map_err(Error::InvalidConfig)?;

        let mut entries = Vec::with_capacity(states);
        for state in 0..states {
            let access = AccessMode::from_u8(file.access[state]).ok_or_else(|| {
                Error::Parse(format!(
                    "unknown access mode {} at state {}",
                    file.access[state], state
                ))
            })?;
            let priority = file.priority[state];
            if !(0.0..=1.0).contains(&priority) {
                return Err(Error::InvalidConfig(format!(
                    "priority {} at state {} outside [0, 1]",
                    priority, state
                )));
            }
            let expose = file.expose.get(state).copied().unwrap_or(false);
            let safeguard = if file.safeguard.is_empty() {
                vec![0; txn_types]
            } else {
                file.safeguard.iter().map(|row| row[state]).collect()
            };
            entries.push(
                PolicyEntry::new(
                    access,
                    WaitPriority::new(priority),
                    expose,
                    file.timeout[state],
                    txn_types,
                )
                .with_safeguard(safeguard),
            );
        }

        let mut table = Self::from_entries("policy-file", entries)?.with_backoff(file.backoff);
        if let Some(size) = file.txn_buf_size {
            table.txn_buf_size = size;
        }
        Ok(table)
    }

    /// Entry for `state`
    ///
    /// # Panics
    ///
    /// Panics if `state` is outside the table; encoders are validated
    /// against the table size when the context is built.
    #[inline]
    pub fn lookup(&self, state: u32) -> &PolicyEntry {
        &self.entries[state as usize]
    }

    /// Number of populated states
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no states
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Table origin (preset name or file path)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Learned retry backoff
    pub fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    /// Transaction buffer size hint carried by learned policies
    pub fn txn_buf_size(&self) -> u32 {
        self.txn_buf_size
    }

    /// Human-readable dump of the first `states` entries
    pub fn dump(&self, states: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "policy {}", self.name);
        for (state, entry) in self.entries.iter().take(states).enumerate() {
            let _ = write!(
                out,
                "{:>4}  {:<5} {} p={} ",
                state,
                entry.access,
                if entry.expose { "EXPO" } else { "HIDE" },
                entry.priority
            );
            if entry.access == AccessMode::Guarded {
                let _ = write!(out, "guard={:?} ", entry.safeguard);
            }
            let _ = writeln!(out, "timeout={}us", entry.timeout_us);
        }
        out
    }
}
