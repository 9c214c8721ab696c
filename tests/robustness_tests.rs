use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

#[test]
fn test_malformed_csv_handling() {
    let ops = common::ops_file(&[
        "open, alice, , 0, RUB, ,",
        // valid deposit
        "deposit, alice, , 1.0, , ,",
        // unknown operation type
        "refund, alice, , 1.0, , ,",
        // missing amount
        "deposit, alice, , , , ,",
        // valid deposit again
        "deposit, alice, , 2.0, , ,",
    ]);

    let mut cmd = Command::new(cargo_bin!("bank-core"));
    cmd.arg("replay").arg(ops.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("error reading operation"))
        .stderr(predicate::str::contains("error processing operation"))
        .stdout(predicate::str::contains("alice,alice,RUB,3.0,0"));
}

#[test]
fn test_invalid_data_types() {
    let ops = common::ops_file(&[
        "open, alice, , 0, RUB, ,",
        // text in amount field
        "deposit, alice, , not_a_number, , ,",
        // unknown account label
        "deposit, carol, , 1.0, , ,",
        // currency code of the wrong length
        "open, dave, , 0, RUBLE, ,",
        "deposit, alice, , 5.0, , ,",
    ]);

    let mut cmd = Command::new(cargo_bin!("bank-core"));
    cmd.arg("replay").arg(ops.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("error reading operation"))
        .stdout(predicate::str::contains("alice,alice,RUB,5.0,0"))
        .stdout(predicate::str::contains("dave").not())
        .stdout(predicate::str::contains("carol").not());
}

#[test]
fn test_rejected_operations_leave_no_trace() {
    let ops = common::ops_file(&[
        "open, alice, , 10, RUB, ,",
        "open, bob, , 0, USD, ,",
        // currency mismatch
        "transfer, alice, bob, 5, , ,",
        // self transfer
        "transfer, alice, alice, 5, , ,",
        // non-positive amounts
        "withdraw, alice, , -3, , ,",
        "deposit, alice, , 0, , ,",
        // duplicate label
        "open, alice, , 99, RUB, ,",
    ]);

    let mut cmd = Command::new(cargo_bin!("bank-core"));
    cmd.arg("replay").arg(ops.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("alice,alice,RUB,10,0\n"))
        .stdout(predicate::str::contains("bob,bob,USD,0,0\n"));
}
