use bank_core::domain::credit::Credit;
use bank_core::domain::ids::{AccountId, UserId};
use bank_core::domain::ports::CreditStore;
use bank_core::error::LedgerError;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mod common;
use common::{Bank, deadline};

#[tokio::test]
async fn test_monthly_summary_counts_own_deposits_and_withdrawals() {
    let bank = Bank::new();
    let owner = UserId::new();
    let account = bank.open_for(owner, dec!(100)).await;
    let other = bank.open(dec!(0)).await;

    bank.ledger.deposit(account.id, dec!(200), deadline()).await.unwrap();
    bank.ledger.withdraw(account.id, dec!(30), deadline()).await.unwrap();
    bank.ledger.transfer(account.id, other.id, dec!(10), deadline()).await.unwrap();
    bank.ledger.deposit(other.id, dec!(999), deadline()).await.unwrap();

    let (credit, mut schedule) = Credit::issue(owner, account.id, dec!(1200), dec!(0), 12).unwrap();
    schedule[0].due_date = Utc::now();
    bank.store.insert_credit(credit, schedule).await.unwrap();

    let summary = bank
        .analytics
        .monthly_summary(owner, Utc::now(), deadline())
        .await
        .unwrap();

    assert_eq!(summary.owner, owner);
    assert_eq!(summary.total_deposits, dec!(200));
    assert_eq!(summary.total_withdrawals, dec!(30));
    assert_eq!(summary.net_change, dec!(170));
    assert_eq!(summary.scheduled_payments, dec!(100));
    assert_eq!(summary.credit_load, dec!(0.5));
    assert!(summary.period_start <= Utc::now() && Utc::now() < summary.period_end);
}

#[tokio::test]
async fn test_monthly_summary_without_deposits_has_zero_load() {
    let bank = Bank::new();
    let owner = UserId::new();
    let account = bank.open_for(owner, dec!(500)).await;
    bank.ledger.withdraw(account.id, dec!(20), deadline()).await.unwrap();

    let (credit, mut schedule) = Credit::issue(owner, account.id, dec!(600), dec!(0), 6).unwrap();
    schedule[0].due_date = Utc::now();
    bank.store.insert_credit(credit, schedule).await.unwrap();

    let summary = bank
        .analytics
        .monthly_summary(owner, Utc::now(), deadline())
        .await
        .unwrap();
    assert_eq!(summary.total_deposits, Decimal::ZERO);
    assert_eq!(summary.net_change, dec!(-20));
    assert_eq!(summary.scheduled_payments, dec!(100));
    assert_eq!(summary.credit_load, Decimal::ZERO);
}

#[tokio::test]
async fn test_monthly_summary_for_unknown_user_is_empty() {
    let bank = Bank::new();
    bank.open(dec!(10)).await;

    let summary = bank
        .analytics
        .monthly_summary(UserId::new(), Utc::now(), deadline())
        .await
        .unwrap();
    assert_eq!(summary.total_deposits, Decimal::ZERO);
    assert_eq!(summary.scheduled_payments, Decimal::ZERO);
}

#[tokio::test]
async fn test_predict_balance_subtracts_daily_outflow() {
    let bank = Bank::new();
    let account = bank.open(dec!(270)).await;

    let projected = bank.analytics.predict_balance(account.id, 3, deadline()).await.unwrap();
    assert_eq!(projected, dec!(120));
    let projected = bank.analytics.predict_balance(account.id, 10, deadline()).await.unwrap();
    assert_eq!(projected, dec!(-230));
    assert_eq!(
        bank.analytics.predict_balance(account.id, 0, deadline()).await.unwrap(),
        dec!(270)
    );

    let missing = bank.analytics.predict_balance(AccountId::new(), 1, deadline()).await;
    assert!(matches!(missing, Err(LedgerError::NotFound { .. })));
}
