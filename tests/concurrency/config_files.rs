//! Config and Policy File Tests
//!
//! Databases opened from TOML files on disk.

use crate::*;
use morphdb::morph_policy::AccessMode;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CONFIG: &str = r#"
encoder = { kinds = ["linear", "ignore", "linear", "ignore", "ignore", "ignore"], caps = [1, 1, 4, 1, 1, 1] }
policy = { file = "learned.toml" }
retry_times = 2

[workload]
access_counts = [2]

[lock]
deadlock = "cautious_wait"
"#;

const POLICY: &str = r#"
access = [3, 2, 1, 0]
priority = [0.0, 0.25, 0.5, 1.0]
timeout = [0, 1000, 2000, 3000]
expose = [false, false, true, true]
safeguard = [[0, 1, 2, 3]]
txn_buf_size = 64

[backoff]
increase = [[50.0]]
decrease = [[10.0]]
"#;

fn write_files(dir: &Path, config: &str, policy: &str) -> std::path::PathBuf {
    fs::write(dir.join("learned.toml"), policy).unwrap();
    let path = dir.join("cc.toml");
    fs::write(&path, config).unwrap();
    path
}

#[test]
fn test_open_from_config_and_policy_files() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Database::open(write_files(dir.path(), CONFIG, POLICY)).unwrap();

    assert_eq!(db.config().lock.deadlock, DeadlockStrategy::CautiousWait);
    assert_eq!(db.config().retry_times, 2);
    let policy = db.policy();
    assert_eq!(policy.len(), 4);
    assert!(policy.name().ends_with("learned.toml"));
    assert_eq!(policy.txn_buf_size(), 64);
    assert!(policy.backoff().is_learned());
    assert_eq!(policy.lookup(0).access, AccessMode::DetectAll);
    assert_eq!(policy.lookup(2).access, AccessMode::TrackDirty);
    assert!(policy.lookup(3).expose);
    assert_eq!(policy.lookup(3).safeguard_for(TxnType(0)), 3);
}

#[test]
fn test_file_policy_drives_state_visits() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Database::open(write_files(dir.path(), CONFIG, POLICY)).unwrap();

    // read at op 1 (guarded), write at op 2 (exposed), commit at op 2
    db.run(TxnType(0), |txn| add(txn, &Key::from("k"), 1)).unwrap();
    assert_eq!(decode(db.get(&Key::from("k"))), 1);

    let metrics = db.metrics();
    assert_eq!(metrics.detail.state_visits[0], 0);
    assert_eq!(metrics.detail.state_visits[1], 1);
    assert!(metrics.detail.state_visits[2] >= 2);
    assert_quiescent(&db);
}

#[test]
fn test_ragged_policy_is_rejected() {
    let dir = TempDir::new().unwrap();
    let policy = "access = [3, 2]\npriority = [0.5]\ntimeout = [0, 0]\n";
    let err = Database::open(write_files(dir.path(), CONFIG, policy)).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{:?}", err);
}

#[test]
fn test_policy_smaller_than_encoder_is_rejected() {
    let dir = TempDir::new().unwrap();
    let policy = "access = [3, 2]\npriority = [0.5, 0.5]\ntimeout = [0, 0]\n";
    let err = Database::open(write_files(dir.path(), CONFIG, policy)).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{:?}", err);
}

#[test]
fn test_missing_files() {
    let dir = TempDir::new().unwrap();
    let err = Database::open(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));

    let path = dir.path().join("cc.toml");
    fs::write(&path, CONFIG).unwrap();
    let err = Database::open(&path).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cc.toml");
    fs::write(&path, "[lock]\ndeadlock = \"optimism\"\n").unwrap();
    let err = Database::open(&path).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
