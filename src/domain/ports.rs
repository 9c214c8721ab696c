use super::account::{Account, LedgerEntry, OverdraftPolicy};
use super::credit::Credit;
use super::events::LedgerEvent;
use super::ids::{AccountId, CreditId, ScheduleEntryId, UserId};
use super::money::Amount;
use super::schedule::{PenaltyOutcome, ScheduleEntry};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Durable storage of accounts and their journal.
///
/// Every mutating method is one atomic unit: either all of its effects are
/// durable or none are. Implementations lock account rows in ascending
/// [`AccountId`] order.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: Account) -> Result<()>;
    async fn get(&self, id: AccountId) -> Result<Option<Account>>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;

    /// Atomic read-modify-write of one balance, journaled.
    async fn adjust_balance(
        &self,
        id: AccountId,
        delta: Decimal,
        policy: OverdraftPolicy,
    ) -> Result<Account>;

    /// Debits `from` and credits `to` in one transaction.
    async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        policy: OverdraftPolicy,
    ) -> Result<(Account, Account)>;

    /// Journal rows of one account, oldest first.
    async fn history(&self, id: AccountId) -> Result<Vec<LedgerEntry>>;
}

/// Durable storage of credits and their payment schedules.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Inserts a credit together with its whole schedule. Partial schedules
    /// are never observable.
    async fn insert_credit(&self, credit: Credit, schedule: Vec<ScheduleEntry>) -> Result<()>;
    async fn get_credit(&self, id: CreditId) -> Result<Option<Credit>>;
    async fn credits_for_user(&self, owner: UserId) -> Result<Vec<Credit>>;
    async fn get_entry(&self, id: ScheduleEntryId) -> Result<Option<ScheduleEntry>>;

    /// Entries of one credit ordered by due date.
    async fn schedule_for(&self, credit_id: CreditId) -> Result<Vec<ScheduleEntry>>;

    /// Entries due in `[from, to)`, ordered by due date.
    async fn due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ScheduleEntry>>;

    /// Unpaid entries with `due_date < as_of`, ordered by due date.
    async fn overdue_unpaid(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduleEntry>>;

    /// Re-checks the entry under lock, adds `entry.amount * rate` to the
    /// owning credit and marks the entry penalized, atomically.
    async fn apply_penalty(
        &self,
        entry_id: ScheduleEntryId,
        rate: Decimal,
        as_of: DateTime<Utc>,
    ) -> Result<PenaltyOutcome>;

    /// On-time payment: debits `from`, reduces the credit outstanding and
    /// marks the entry paid, atomically. Spans account rows, so stores
    /// implementing this also own the accounts table.
    async fn settle_installment(
        &self,
        entry_id: ScheduleEntryId,
        from: AccountId,
        policy: OverdraftPolicy,
        paid_at: DateTime<Utc>,
    ) -> Result<ScheduleEntry>;
}

/// Fire-and-forget sink for committed ledger events.
///
/// Must not block and must not fail the caller; delivery problems are the
/// adapter's to log.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: LedgerEvent);
}

/// Source of a reference (key) interest rate, in percent.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn key_rate(&self) -> Result<Decimal>;
}

pub type AccountStoreRef = Arc<dyn AccountStore>;
pub type CreditStoreRef = Arc<dyn CreditStore>;
pub type NotifierRef = Arc<dyn Notifier>;
pub type RateSourceRef = Arc<dyn RateSource>;
