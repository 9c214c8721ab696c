#![cfg(feature = "storage-rocksdb")]

use bank_core::application::ledger::LedgerService;
use bank_core::domain::account::OverdraftPolicy;
use bank_core::domain::credit::Credit;
use bank_core::domain::ids::UserId;
use bank_core::domain::ports::{AccountStore, CreditStore};
use bank_core::infrastructure::notify::TracingNotifier;
use bank_core::infrastructure::rocksdb::RocksDBStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

mod common;
use common::deadline;

#[tokio::test]
async fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");
    let owner = UserId::new();

    // 1. First open: create an account, move money, issue a credit
    let (account_id, credit_id) = {
        let store = RocksDBStore::open(&db_path, Duration::from_secs(1)).unwrap();
        let ledger = LedgerService::new(
            Arc::new(store.clone()),
            Arc::new(TracingNotifier),
            OverdraftPolicy::Forbid,
        );
        let account = ledger.create_account(owner, "RUB", dec!(100.0), deadline()).await.unwrap();
        ledger.deposit(account.id, dec!(50.0), deadline()).await.unwrap();

        let (credit, schedule) = Credit::issue(owner, account.id, dec!(1200), dec!(12), 12).unwrap();
        store.insert_credit(credit.clone(), schedule).await.unwrap();
        (account.id, credit.id)
    };

    // 2. Reopen the same path: everything is recovered
    let store = RocksDBStore::open(&db_path, Duration::from_secs(1)).unwrap();
    let account = store.get(account_id).await.unwrap().unwrap();
    assert_eq!(account.balance.value(), dec!(150.0));
    assert_eq!(store.history(account_id).await.unwrap().len(), 2);

    let credit = store.get_credit(credit_id).await.unwrap().unwrap();
    assert_eq!(credit.outstanding, dec!(1279.44));
    assert_eq!(store.schedule_for(credit_id).await.unwrap().len(), 12);
    assert_eq!(store.credits_for_user(owner).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rocksdb_opposite_transfers_do_not_deadlock() {
    let dir = tempdir().unwrap();
    let store = RocksDBStore::open(dir.path().join("db"), Duration::from_secs(5)).unwrap();
    let ledger = Arc::new(LedgerService::new(
        Arc::new(store.clone()),
        Arc::new(TracingNotifier),
        OverdraftPolicy::Forbid,
    ));
    let a = ledger.create_account(UserId::new(), "RUB", dec!(1000), deadline()).await.unwrap();
    let b = ledger.create_account(UserId::new(), "RUB", dec!(1000), deadline()).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..100 {
        let ledger = ledger.clone();
        let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
        let amount = Decimal::from(i % 7 + 1);
        tasks.push(tokio::spawn(async move {
            ledger.transfer(from, to, amount, deadline()).await.map(|_| (from, amount))
        }));
    }

    let results = tokio::time::timeout(Duration::from_secs(60), async {
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        results
    })
    .await
    .expect("opposite transfers never finished");

    let mut expected_a = dec!(1000);
    for result in &results {
        let (from, amount) = result.as_ref().unwrap();
        if *from == a.id {
            expected_a -= *amount;
        } else {
            expected_a += *amount;
        }
    }

    let a_after = store.get(a.id).await.unwrap().unwrap().balance.value();
    let b_after = store.get(b.id).await.unwrap().unwrap().balance.value();
    assert_eq!(a_after, expected_a);
    assert_eq!(a_after + b_after, dec!(2000));
    assert_eq!(store.history(a.id).await.unwrap().len(), 101);
    assert_eq!(store.history(b.id).await.unwrap().len(), 101);
}
