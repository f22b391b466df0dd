//! Preset Policy Tests
//!
//! Contended read-modify-write under each preset must never lose an update.

use crate::*;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;
const INCREMENTS: usize = 50;

fn hammer_counter(preset: PolicyPreset) {
    let db = Arc::new(open_db(preset));
    let key = Key::from("counter");
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let db = Arc::clone(&db);
            let key = key.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut committed = 0u64;
                for _ in 0..INCREMENTS {
                    if db.run(TxnType(0), |txn| add(txn, &key, 1)).is_ok() {
                        committed += 1;
                    }
                }
                committed
            })
        })
        .collect();

    let committed: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(decode(db.get(&key)), committed, "lost update under {:?}", preset);
    assert!(committed > 0);
    assert_quiescent(&db);

    let metrics = db.metrics();
    assert_eq!(metrics.transactions_committed, committed);
}

#[test]
fn test_two_phase_locking_counter() {
    hammer_counter(PolicyPreset::TwoPhaseLocking);
}

#[test]
fn test_optimistic_counter() {
    hammer_counter(PolicyPreset::Optimistic);
}

#[test]
fn test_pipelined_counter() {
    hammer_counter(PolicyPreset::Pipelined);
}

#[test]
fn test_uncontended_commits_never_abort() {
    for preset in all_presets() {
        let db = open_db(preset);
        for i in 0..20u64 {
            db.run(TxnType(0), |txn| add(txn, &Key::from(i), 5)).unwrap();
        }
        for i in 0..20u64 {
            assert_eq!(decode(db.get(&Key::from(i))), 5);
        }
        assert_eq!(db.version(), 20);
        assert_eq!(db.metrics().transactions_aborted, 0, "{:?}", preset);
    }
}

#[test]
fn test_optimistic_stale_read_is_typed_abort() {
    let db = open_db(PolicyPreset::Optimistic);
    let key = Key::from("x");
    db.run(TxnType(0), |txn| add(txn, &key, 1)).unwrap();

    let mut stale = db.transaction(TxnType(0)).unwrap();
    add(&mut stale, &key, 10).unwrap();
    db.run(TxnType(0), |txn| add(txn, &key, 100)).unwrap();

    let err: Error = stale.commit().unwrap_err().into();
    assert_eq!(err.abort_reason(), Some(AbortReason::ValidationFailed));
    assert!(err.is_retryable());
    assert_eq!(decode(db.get(&key)), 101);
}

#[test]
fn test_two_phase_locking_refuses_younger_waiter() {
    let db = open_db(PolicyPreset::TwoPhaseLocking);
    let key = Key::from("row");

    let mut older = db.transaction(TxnType(0)).unwrap();
    add(&mut older, &key, 1).unwrap();

    let mut younger = db.transaction(TxnType(0)).unwrap();
    let err = younger.read(&key).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::DeadlockAvoided));

    older.commit().unwrap();
    assert_eq!(db.metrics().deadlocks_avoided, 1);
    assert_quiescent(&db);
}
