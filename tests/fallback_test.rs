use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let ops = common::ops_file(&["open, alice, , 100.0, RUB, ,"]);

    let mut cmd = Command::new(cargo_bin!("bank-core"));
    cmd.arg("replay").arg(ops.path()).arg("--db-path").arg("some_db");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains(
            "falling back to in-memory storage",
        ))
        .stdout(predicate::str::contains("alice,alice,RUB,100.0,0"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let ops = common::ops_file(&["open, alice, , 100.0, RUB, ,"]);

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("bank-core"));
    cmd.arg("replay").arg(ops.path()).arg("--db-path").arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("falling back").not());
}
