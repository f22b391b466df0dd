//! Stress Tests
//!
//! Randomized bank transfers with concurrent auditors. Money is only moved,
//! so every committed audit and the final state must see the opening total.

use crate::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const ACCOUNTS: u64 = 8;
const OPENING: u64 = 1_000;
const WORKERS: usize = 4;
const TRANSFERS: usize = 100;

fn account(i: u64) -> Key {
    Key::from(format!("acct:{}", i))
}

fn total(txn: &mut Transaction<'_>) -> morphdb::morph_core::Result<u64> {
    let mut sum = 0;
    for i in 0..ACCOUNTS {
        sum += decode(txn.read(&account(i))?);
    }
    Ok(sum)
}

fn run_bank(builder: DatabaseBuilder) {
    init_tracing();
    let db = Arc::new(builder.retry_times(1_000).open().unwrap());
    db.run(TxnType(0), |txn| {
        for i in 0..ACCOUNTS {
            txn.write(account(i), encode(OPENING))?;
        }
        Ok(())
    })
    .unwrap();

    let barrier = Arc::new(Barrier::new(WORKERS + 1));
    let done = Arc::new(AtomicBool::new(false));
    let audits = Arc::new(AtomicU64::new(0));

    let auditor = {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        let audits = Arc::clone(&audits);
        thread::spawn(move || {
            barrier.wait();
            while !done.load(Ordering::Acquire) {
                if let Ok(sum) = db.run(TxnType(0), total) {
                    assert_eq!(sum, OPENING * ACCOUNTS, "inconsistent audit");
                    audits.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
    };

    let workers: Vec<_> = (0..WORKERS)
        .map(|w| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(w as u64);
                barrier.wait();
                for _ in 0..TRANSFERS {
                    let from = rng.gen_range(0..ACCOUNTS);
                    let to = (from + rng.gen_range(1..ACCOUNTS)) % ACCOUNTS;
                    let amount = rng.gen_range(1..=10i64);
                    // insufficient funds and exhausted retries both skip
                    let _ = db.run(TxnType(0), |txn| {
                        let balance = decode(txn.read(&account(from))?);
                        if balance < amount as u64 {
                            return Ok(());
                        }
                        add(txn, &account(from), -amount)?;
                        add(txn, &account(to), amount)?;
                        Ok(())
                    });
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    done.store(true, Ordering::Release);
    auditor.join().unwrap();

    let sum: u64 = (0..ACCOUNTS).map(|i| decode(db.get(&account(i)))).sum();
    assert_eq!(sum, OPENING * ACCOUNTS);
    assert_quiescent(&db);
    let metrics = db.metrics();
    assert!(metrics.transactions_committed > 1);
    assert!(metrics.detail.total_aborts == metrics.transactions_aborted);
}

#[test]
fn test_bank_two_phase_locking_wait_die() {
    run_bank(Database::builder().policy_preset(PolicyPreset::TwoPhaseLocking));
}

#[test]
fn test_bank_two_phase_locking_cautious_wait() {
    run_bank(
        Database::builder()
            .policy_preset(PolicyPreset::TwoPhaseLocking)
            .deadlock(DeadlockStrategy::CautiousWait),
    );
}

#[test]
fn test_bank_two_phase_locking_bitmap() {
    run_bank(
        Database::builder()
            .policy_preset(PolicyPreset::TwoPhaseLocking)
            .deadlock(DeadlockStrategy::Bitmap),
    );
}

#[test]
fn test_bank_two_phase_locking_dependency_graph() {
    run_bank(
        Database::builder()
            .policy_preset(PolicyPreset::TwoPhaseLocking)
            .tracking(TrackingMode::FullGraph)
            .deadlock(DeadlockStrategy::DependencyGraph),
    );
}

#[test]
fn test_bank_two_phase_locking_real_time_priority() {
    run_bank(
        Database::builder()
            .policy_preset(PolicyPreset::TwoPhaseLocking)
            .real_time_priority(true),
    );
}

#[test]
fn test_bank_optimistic() {
    run_bank(Database::builder().policy_preset(PolicyPreset::Optimistic));
}

#[test]
fn test_bank_pipelined() {
    run_bank(Database::builder().policy_preset(PolicyPreset::Pipelined));
}

#[test]
fn test_bank_pipelined_full_graph() {
    run_bank(
        Database::builder()
            .policy_preset(PolicyPreset::Pipelined)
            .tracking(TrackingMode::FullGraph),
    );
}
