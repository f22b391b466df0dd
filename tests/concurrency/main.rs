//! Concurrency Control Integration Tests
//!
//! Multi-threaded workloads driven through the `Database` facade under every
//! preset policy, deadlock check and tracking mode.
//!
//! ## Key Verification Points
//!
//! 1. No lost updates: counters and balances add up after contention
//! 2. Aborts are typed and cleaned up: no lock entry, exposure or
//!    dependency edge outlives its transaction
//! 3. Policy and config files load from disk and drive execution
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test concurrency
//! cargo test --test concurrency stress::
//! ```

use morphdb::prelude::*;
use std::sync::Once;

// Test modules
pub mod config_files;
pub mod early_exposure;
pub mod presets;
pub mod stress;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::INFO)
            .try_init();
    });
}

/// Every preset policy
pub fn all_presets() -> [PolicyPreset; 3] {
    [
        PolicyPreset::TwoPhaseLocking,
        PolicyPreset::Optimistic,
        PolicyPreset::Pipelined,
    ]
}

/// Open a database with a preset and generous retries
pub fn open_db(preset: PolicyPreset) -> Database {
    init_tracing();
    Database::builder()
        .policy_preset(preset)
        .retry_times(1_000)
        .open()
        .expect("Failed to open database")
}

/// Decode a stored counter (absent = 0)
pub fn decode(value: Option<Vec<u8>>) -> u64 {
    value.map_or(0, |bytes| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        u64::from_le_bytes(raw)
    })
}

/// Encode a counter
pub fn encode(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Read-modify-write `key` by `delta` inside `txn`
pub fn add(txn: &mut Transaction<'_>, key: &Key, delta: i64) -> morphdb::morph_core::Result<u64> {
    let current = decode(txn.read(key)?);
    let next = current.wrapping_add_signed(delta);
    txn.write(key.clone(), encode(next))?;
    Ok(next)
}

/// Assert that no record lock, exposure or blocked counter is left behind
pub fn assert_quiescent(db: &Database) {
    let manager = db.manager();
    assert!(manager.exposure().is_empty(), "exposures left behind");
    assert_eq!(db.metrics().transactions_blocked, 0);
    for i in 0..64u64 {
        for key in [Key::from(i), Key::from(format!("acct:{}", i))] {
            if let Some(lock) = manager.locks().get(&key) {
                assert_eq!(lock.owner_count(), 0, "owner left on {}", key);
                assert_eq!(lock.waiter_count(), 0, "waiter left on {}", key);
            }
        }
    }
}
