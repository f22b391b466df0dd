//! Early Exposure Tests
//!
//! Writes published before commit, the dependencies they create for dirty
//! readers, and the aborts that cascade through them.

use crate::*;
use morphdb::morph_policy::{AccessMode, PolicyEntry, WaitPriority, MAX_STATE};
use std::thread;
use std::time::{Duration, Instant};

fn uniform_policy(entry: PolicyEntry) -> PolicyTable {
    PolicyTable::from_entries("uniform", vec![entry; MAX_STATE]).unwrap()
}

#[test]
fn test_abort_cascades_through_dirty_read_chain() {
    let db = open_db(PolicyPreset::Pipelined);
    let k = Key::from("k");
    let j = Key::from("j");

    let mut writer = db.transaction(TxnType(0)).unwrap();
    writer.write(k.clone(), encode(1)).unwrap();

    let mut first = db.transaction(TxnType(0)).unwrap();
    assert_eq!(decode(first.read(&k).unwrap()), 1);
    first.write(j.clone(), encode(2)).unwrap();

    let mut second = db.transaction(TxnType(0)).unwrap();
    assert_eq!(decode(second.read(&j).unwrap()), 2);
    assert!(second.dependencies().contains(first.id()));

    writer.abort().unwrap();
    let err = first.commit().unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::Cascading));
    let err = second.commit().unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::Cascading));

    assert!(db.get(&k).is_none());
    assert!(db.get(&j).is_none());
    assert_eq!(db.metrics().cascading_aborts, 2);
    assert_quiescent(&db);
}

#[test]
fn test_dirty_reader_commit_waits_for_writer() {
    let db = open_db(PolicyPreset::Pipelined);
    let key = Key::from("hot");

    let mut writer = db.transaction(TxnType(0)).unwrap();
    writer.write(key.clone(), encode(7)).unwrap();

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut reader = db.transaction(TxnType(0)).unwrap();
            let seen = decode(reader.read(&key).unwrap());
            let started = Instant::now();
            let version = reader.commit().unwrap();
            (seen, version, started.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        let version = writer.commit().unwrap();
        let (seen, reader_version, waited) = reader.join().unwrap();
        assert_eq!(seen, 7);
        assert_eq!(reader_version, version);
        assert!(waited >= Duration::from_millis(5), "reader committed after {:?}", waited);
    });
    assert_quiescent(&db);
}

#[test]
fn test_guarded_read_proceeds_past_safeguard() {
    init_tracing();
    let entry = PolicyEntry::new(AccessMode::Guarded, WaitPriority::LOWEST, true, 2_000_000, 1)
        .with_safeguard(vec![2]);
    let db = Database::builder().policy(uniform_policy(entry)).open().unwrap();
    let a = Key::from("a");

    let mut writer = db.transaction(TxnType(0)).unwrap();
    writer.write(a.clone(), encode(1)).unwrap();

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut reader = db.transaction(TxnType(0)).unwrap();
            assert_eq!(decode(reader.read(&a).unwrap()), 1);
            // blocks until the writer has run more than two accesses
            reader.read(&Key::from("b")).unwrap();
            reader
        });

        thread::sleep(Duration::from_millis(10));
        writer.write(Key::from("c"), encode(3)).unwrap();
        writer.write(Key::from("d"), encode(4)).unwrap();
        let reader = reader.join().unwrap();
        assert!(writer.descriptor().op_count() > 2);

        writer.commit().unwrap();
        reader.commit().unwrap();
    });
    assert_eq!(db.version(), 1);
}

#[test]
fn test_guarded_read_times_out_before_safeguard() {
    init_tracing();
    let entry = PolicyEntry::new(AccessMode::Guarded, WaitPriority::LOWEST, true, 1_000, 1)
        .with_safeguard(vec![5]);
    let db = Database::builder().policy(uniform_policy(entry)).open().unwrap();

    let mut writer = db.transaction(TxnType(0)).unwrap();
    writer.write(Key::from("a"), encode(1)).unwrap();
    let mut reader = db.transaction(TxnType(0)).unwrap();
    reader.read(&Key::from("a")).unwrap();

    let err = reader.read(&Key::from("b")).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::Timeout));
    assert!(writer.descriptor().deps().is_clear());
    writer.commit().unwrap();
    assert_quiescent(&db);
}
