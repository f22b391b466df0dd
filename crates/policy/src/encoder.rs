//! State encoding
//!
//! Maps a transaction's live feature vector to a bounded policy index.
//!
//! # Features (most significant first)
//!
//! | # | Feature | Source |
//! |---|---------|--------|
//! | 0 | transaction type | descriptor |
//! | 1 | current op kind | descriptor |
//! | 2 | op count | descriptor |
//! | 3 | #transactions this one waits on | dependency state |
//! | 4 | #transactions waiting on this one | dependency state |
//! | 5 | #transactions currently blocked | global gauge |
//!
//! Each feature is clamped to `cap - 1`, transformed by its
//! [`EncodingKind`], and combined with mixed-radix place values:
//!
//! ```text
//! state = Σ transform_i(min(x_i, cap_i - 1)) * place_i
//! place_{N-1} = 1,  place_i = place_{i+1} * range_{i+1}
//! ```
//!
//! | Kind | transform(v) | range(cap) |
//! |------|--------------|------------|
//! | Ignore | 0 | 1 |
//! | Boolean | v > 0 | 2 |
//! | Log | ⌊log2(v+1)⌋ | ⌊log2(cap)⌋ + 1 |
//! | Linear | v | cap |

use crate::table::MAX_STATE;
use morph_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of encoder features
pub const N_FEATURES: usize = 6;

/// Raw feature values, indexed by [`Feature`]
pub type FeatureVector = [u32; N_FEATURES];

/// Encoder feature positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Feature {
    /// Transaction type
    TxnType = 0,
    /// Current operation kind
    OpKind = 1,
    /// Number of executed operations
    OpCount = 2,
    /// Transactions this one is waiting on
    BlockedOn = 3,
    /// Transactions waiting on this one
    Blocking = 4,
    /// Transactions blocked system-wide
    GlobalBlocked = 5,
}

impl Feature {
    /// All features in encoding order
    pub const ALL: [Feature; N_FEATURES] = [
        Feature::TxnType,
        Feature::OpKind,
        Feature::OpCount,
        Feature::BlockedOn,
        Feature::Blocking,
        Feature::GlobalBlocked,
    ];

    /// Position in a [`FeatureVector`]
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// How a single feature contributes to the state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    /// Feature does not affect the state
    #[default]
    Ignore,
    /// Zero vs non-zero
    Boolean,
    /// Logarithmic buckets
    Log,
    /// One state per value
    Linear,
}

impl EncodingKind {
    /// Decode the numeric form of legacy encoder files
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(EncodingKind::Ignore),
            1 => Some(EncodingKind::Boolean),
            2 => Some(EncodingKind::Log),
            3 => Some(EncodingKind::Linear),
            _ => None,
        }
    }

    /// Number of distinct outputs for a feature capped at `cap`
    pub fn variable_range(self, cap: u32) -> u32 {
        match self {
            EncodingKind::Ignore => 1,
            EncodingKind::Boolean => 2,
            EncodingKind::Log => floor_log2(cap) + 1,
            EncodingKind::Linear => cap,
        }
    }

    /// Transform an already clamped value
    #[inline]
    pub fn transform(self, clamped: u32) -> u32 {
        match self {
            EncodingKind::Ignore => 0,
            EncodingKind::Boolean => u32::from(clamped > 0),
            EncodingKind::Log => floor_log2(clamped.saturating_add(1)),
            EncodingKind::Linear => clamped,
        }
    }
}

#[inline]
fn floor_log2(v: u32) -> u32 {
    debug_assert!(v > 0);
    31 - v.leading_zeros()
}

/// Per-feature encoding configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSpec {
    /// Encoding kind per feature
    pub kinds: [EncodingKind; N_FEATURES],
    /// Cap per feature; must be positive
    pub caps: [i64; N_FEATURES],
}

impl EncoderSpec {
    /// Only transaction type and op count vary, both linearly
    ///
    /// `max_state = txn_types * op_cap`.
    pub fn step(txn_types: u32, op_cap: u32) -> Self {
        let mut kinds = [EncodingKind::Ignore; N_FEATURES];
        let mut caps = [1i64; N_FEATURES];
        kinds[Feature::TxnType.index()] = EncodingKind::Linear;
        kinds[Feature::OpCount.index()] = EncodingKind::Linear;
        caps[Feature::TxnType.index()] = i64::from(txn_types);
        caps[Feature::OpCount.index()] = i64::from(op_cap);
        Self { kinds, caps }
    }

    /// Parse the whitespace-separated legacy form
    ///
    /// Six encoding kinds (`0..=3`) followed by six caps.
    ///
    /// ```
    /// use morph_policy::{EncoderSpec, EncodingKind};
    ///
    /// let spec = EncoderSpec::parse_legacy("3 0 3 1 0 0\n1 1 11 16 1 1").unwrap();
    /// assert_eq!(spec.kinds[3], EncodingKind::Boolean);
    /// assert_eq!(spec.caps[2], 11);
    /// ```
    pub fn parse_legacy(text: &str) -> Result<Self> {
        let values = text
            .split_whitespace()
            .map(|tok| {
                tok.parse::<i64>()
                    .map_err(|e| Error::Parse(format!("encoder token {:?}: {}", tok, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        if values.len() != 2 * N_FEATURES {
            return Err(Error::Parse(format!(
                "encoder spec needs {} values, found {}",
                2 * N_FEATURES,
                values.len()
            )));
        }
        let mut kinds = [EncodingKind::Ignore; N_FEATURES];
        let mut caps = [0i64; N_FEATURES];
        for i in 0..N_FEATURES {
            kinds[i] = u8::try_from(values[i])
                .ok()
                .and_then(EncodingKind::from_u8)
                .ok_or_else(|| Error::Parse(format!("unknown encoding kind {}", values[i])))?;
            caps[i] = values[N_FEATURES + i];
        }
        Ok(Self { kinds, caps })
    }
}

/// Configured feature encoder
#[derive(Debug, Clone)]
pub struct StateEncoder {
    kinds: [EncodingKind; N_FEATURES],
    caps: [u32; N_FEATURES],
    place: [u32; N_FEATURES],
    max_state: u32,
    access_only: bool,
    type_offsets: Vec<u32>,
}

impl StateEncoder {
    /// Validate a spec and precompute place values
    ///
    /// Rejects non-positive caps and encodings whose state space exceeds
    /// [`MAX_STATE`].
    pub fn configure(spec: &EncoderSpec) -> Result<Self> {
        let mut caps = [0u32; N_FEATURES];
        for (i, &cap) in spec.caps.iter().enumerate() {
            if cap <= 0 {
                return Err(Error::InvalidConfig(format!(
                    "encoder cap for feature {} must be positive, got {}",
                    i, cap
                )));
            }
            caps[i] = u32::try_from(cap).map_err(|_| {
                Error::InvalidConfig(format!("encoder cap for feature {} too large: {}", i, cap))
            })?;
        }

        let mut place = [0u32; N_FEATURES];
        let mut product: u64 = 1;
        for i in (0..N_FEATURES).rev() {
            if product > MAX_STATE as u64 {
                break;
            }
            place[i] = product as u32;
            product *= u64::from(spec.kinds[i].variable_range(caps[i]));
        }
        if product > MAX_STATE as u64 {
            return Err(Error::InvalidConfig(format!(
                "encoder state space {} exceeds table capacity {}",
                product, MAX_STATE
            )));
        }

        let access_only = Feature::ALL.iter().all(|f| {
            matches!(f, Feature::TxnType | Feature::OpCount)
                || spec.kinds[f.index()] == EncodingKind::Ignore
        }) && spec.kinds[Feature::OpCount.index()] == EncodingKind::Linear;

        let type_idx = Feature::TxnType.index();
        let type_offsets = if access_only {
            (0..caps[type_idx])
                .map(|t| spec.kinds[type_idx].transform(t) * place[type_idx])
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            kinds: spec.kinds,
            caps,
            place,
            max_state: product as u32,
            access_only,
            type_offsets,
        })
    }

    /// Size of the state space; every encoding is below this
    #[inline]
    pub fn max_state(&self) -> u32 {
        self.max_state
    }

    /// Whether only the op count (and type) vary
    #[inline]
    pub fn access_only(&self) -> bool {
        self.access_only
    }

    /// Encoding kind of a feature
    pub fn kind(&self, feature: Feature) -> EncodingKind {
        self.kinds[feature.index()]
    }

    /// Cap of a feature
    pub fn cap(&self, feature: Feature) -> u32 {
        self.caps[feature.index()]
    }

    /// Encode a feature vector into `[0, max_state)`
    #[inline]
    pub fn encode(&self, features: &FeatureVector) -> u32 {
        if self.access_only {
            return self.encode_step(
                features[Feature::OpCount.index()],
                features[Feature::TxnType.index()],
            );
        }
        self.encode_general(features)
    }

    /// Fast path for `access_only` encoders
    #[inline]
    pub fn encode_step(&self, op_count: u32, txn_type: u32) -> u32 {
        debug_assert!(self.access_only);
        let op_cap = self.caps[Feature::OpCount.index()];
        let type_cap = self.caps[Feature::TxnType.index()];
        let capped_ops = op_count.min(op_cap - 1);
        capped_ops + self.type_offsets[txn_type.min(type_cap - 1) as usize]
    }

    /// Mixed-radix encoding over all features
    pub fn encode_general(&self, features: &FeatureVector) -> u32 {
        let mut state = 0;
        for i in 0..N_FEATURES {
            let clamped = features[i].min(self.caps[i] - 1);
            state += self.kinds[i].transform(clamped) * self.place[i];
        }
        state
    }
}

impl fmt::Display for StateEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encoder(max_state={}", self.max_state)?;
        for feature in Feature::ALL {
            let kind = self.kinds[feature.index()];
            if kind != EncodingKind::Ignore {
                write!(f, ", {:?}={:?}/{}", feature, kind, self.caps[feature.index()])?;
            }
        }
        write!(f, ")")
    }
}
