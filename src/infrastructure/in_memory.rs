use crate::domain::account::{Account, EntryKind, LedgerEntry, OverdraftPolicy};
use crate::domain::credit::Credit;
use crate::domain::ids::{AccountId, CreditId, ScheduleEntryId, UserId};
use crate::domain::money::Amount;
use crate::domain::ports::{AccountStore, CreditStore};
use crate::domain::schedule::{PaymentStatus, PenaltyOutcome, ScheduleEntry};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type Row<T> = Arc<Mutex<T>>;
type Table<K, T> = Arc<RwLock<HashMap<K, Row<T>>>>;

/// A thread-safe in-memory ledger and credit store.
///
/// Each row sits behind its own async mutex. Mutations take row locks in the
/// global order accounts (ascending id), credits, schedule entries, journal,
/// perform every check, and only then write, with no suspension point
/// between the first and the last write. Dropping a mutation future midway
/// therefore never leaves partial state.
///
/// `Clone` shares the underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    accounts: Table<AccountId, Account>,
    journal: Arc<Mutex<Vec<LedgerEntry>>>,
    credits: Table<CreditId, Credit>,
    schedule: Table<ScheduleEntryId, ScheduleEntry>,
}

async fn row<K, T>(table: &Table<K, T>, key: K, entity: &'static str) -> Result<Row<T>>
where
    K: Eq + Hash + ToString,
{
    table
        .read()
        .await
        .get(&key)
        .cloned()
        .ok_or_else(|| LedgerError::not_found(entity, key))
}

/// Fails with `NotFound` if `row` was detached from `table` after its handle
/// was taken. Call with the row lock held.
async fn ensure_live<K, T>(table: &Table<K, T>, key: K, row: &Row<T>, entity: &'static str) -> Result<()>
where
    K: Eq + Hash + ToString,
{
    let live = table
        .read()
        .await
        .get(&key)
        .is_some_and(|current| Arc::ptr_eq(current, row));
    if live {
        Ok(())
    } else {
        Err(LedgerError::not_found(entity, key))
    }
}

/// Snapshot of every row handle, so row locks are never taken while the
/// table lock is held.
async fn rows<K, T>(table: &Table<K, T>) -> Vec<Row<T>> {
    table.read().await.values().cloned().collect()
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletes a credit row and leaves its schedule entries in place, the way
    /// a manual delete on a table without cascading foreign keys would.
    ///
    /// Takes the row lock first, so a mutation already holding the credit
    /// finishes before the row is detached.
    pub async fn remove_credit(&self, id: CreditId) -> Option<Credit> {
        let row = self.credits.read().await.get(&id).cloned()?;
        let credit = row.lock().await;
        self.credits.write().await.remove(&id);
        Some(credit.clone())
    }

    async fn collect_entries<F>(&self, keep: F) -> Vec<ScheduleEntry>
    where
        F: Fn(&ScheduleEntry) -> bool,
    {
        let mut entries = Vec::new();
        for row in rows(&self.schedule).await {
            let entry = row.lock().await;
            if keep(&entry) {
                entries.push(entry.clone());
            }
        }
        entries.sort_by_key(|e| (e.due_date, e.id));
        entries
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn insert(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let mut journal = self.journal.lock().await;
        if accounts.contains_key(&account.id) {
            return Err(LedgerError::validation(format!(
                "account {} already exists",
                account.id
            )));
        }
        if !account.balance.value().is_zero() {
            journal.push(LedgerEntry::new(
                account.id,
                account.balance.value(),
                EntryKind::Opening,
            ));
        }
        accounts.insert(account.id, Arc::new(Mutex::new(account)));
        Ok(())
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let row = self.accounts.read().await.get(&id).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        for row in rows(&self.accounts).await {
            accounts.push(row.lock().await.clone());
        }
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }

    async fn adjust_balance(
        &self,
        id: AccountId,
        delta: Decimal,
        policy: OverdraftPolicy,
    ) -> Result<Account> {
        let row = row(&self.accounts, id, "Account").await?;
        let mut account = row.lock().await;
        let mut journal = self.journal.lock().await;

        account.apply_delta(delta, policy)?;
        journal.push(LedgerEntry::new(id, delta, EntryKind::for_delta(delta)));
        Ok(account.clone())
    }

    async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        policy: OverdraftPolicy,
    ) -> Result<(Account, Account)> {
        if from == to {
            return Err(LedgerError::validation("cannot transfer to the same account"));
        }

        let source_row = row(&self.accounts, from, "Account").await?;
        let dest_row = row(&self.accounts, to, "Account").await?;

        // Ascending identity order; two opposite transfers between the same
        // pair always contend on the same first lock.
        let (mut source, mut dest) = if from < to {
            let source = source_row.lock().await;
            let dest = dest_row.lock().await;
            (source, dest)
        } else {
            let dest = dest_row.lock().await;
            let source = source_row.lock().await;
            (source, dest)
        };

        if source.currency != dest.currency {
            return Err(LedgerError::validation(format!(
                "currency mismatch: {} -> {}",
                source.currency, dest.currency
            )));
        }

        let debited = source.checked_delta(-amount.value(), policy)?;
        let credited = dest.checked_delta(amount.value(), policy)?;
        let mut journal = self.journal.lock().await;

        source.balance = debited;
        dest.balance = credited;
        journal.push(
            LedgerEntry::new(from, -amount.value(), EntryKind::TransferOut).with_counterparty(to),
        );
        journal.push(
            LedgerEntry::new(to, amount.value(), EntryKind::TransferIn).with_counterparty(from),
        );

        Ok((source.clone(), dest.clone()))
    }

    async fn history(&self, id: AccountId) -> Result<Vec<LedgerEntry>> {
        let journal = self.journal.lock().await;
        Ok(journal
            .iter()
            .filter(|e| e.account_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CreditStore for InMemoryStore {
    async fn insert_credit(&self, credit: Credit, schedule: Vec<ScheduleEntry>) -> Result<()> {
        if let Some(stray) = schedule.iter().find(|e| e.credit_id != credit.id) {
            return Err(LedgerError::validation(format!(
                "schedule entry {} belongs to credit {}",
                stray.id, stray.credit_id
            )));
        }

        let mut credits = self.credits.write().await;
        let mut entries = self.schedule.write().await;
        if credits.contains_key(&credit.id) {
            return Err(LedgerError::validation(format!(
                "credit {} already exists",
                credit.id
            )));
        }

        for entry in schedule {
            entries.insert(entry.id, Arc::new(Mutex::new(entry)));
        }
        credits.insert(credit.id, Arc::new(Mutex::new(credit)));
        Ok(())
    }

    async fn get_credit(&self, id: CreditId) -> Result<Option<Credit>> {
        let row = self.credits.read().await.get(&id).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn credits_for_user(&self, owner: UserId) -> Result<Vec<Credit>> {
        let mut credits = Vec::new();
        for row in rows(&self.credits).await {
            let credit = row.lock().await;
            if credit.owner == owner {
                credits.push(credit.clone());
            }
        }
        credits.sort_by_key(|c| (c.created_at, c.id));
        Ok(credits)
    }

    async fn get_entry(&self, id: ScheduleEntryId) -> Result<Option<ScheduleEntry>> {
        let row = self.schedule.read().await.get(&id).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn schedule_for(&self, credit_id: CreditId) -> Result<Vec<ScheduleEntry>> {
        Ok(self.collect_entries(|e| e.credit_id == credit_id).await)
    }

    async fn due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ScheduleEntry>> {
        Ok(self
            .collect_entries(|e| e.due_date >= from && e.due_date < to)
            .await)
    }

    async fn overdue_unpaid(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduleEntry>> {
        Ok(self.collect_entries(|e| e.is_overdue(as_of)).await)
    }

    async fn apply_penalty(
        &self,
        entry_id: ScheduleEntryId,
        rate: Decimal,
        as_of: DateTime<Utc>,
    ) -> Result<PenaltyOutcome> {
        let entry_row = row(&self.schedule, entry_id, "Schedule entry").await?;
        // credit_id never changes after insert, so reading it unlocked-then-relocked is safe.
        let credit_id = entry_row.lock().await.credit_id;
        let credit_row = row(&self.credits, credit_id, "Credit").await?;

        let mut credit = credit_row.lock().await;
        ensure_live(&self.credits, credit_id, &credit_row, "Credit").await?;
        let mut entry = entry_row.lock().await;
        if !entry.is_overdue(as_of) {
            return Ok(PenaltyOutcome::AlreadySettled);
        }

        let penalty = entry.penalty(rate)?;
        credit.add_penalty(penalty)?;
        entry.status = PaymentStatus::Penalized {
            penalized_at: as_of,
            penalty,
        };

        Ok(PenaltyOutcome::Applied {
            credit_id,
            penalty,
            outstanding: credit.outstanding,
        })
    }

    async fn settle_installment(
        &self,
        entry_id: ScheduleEntryId,
        from: AccountId,
        policy: OverdraftPolicy,
        paid_at: DateTime<Utc>,
    ) -> Result<ScheduleEntry> {
        let entry_row = row(&self.schedule, entry_id, "Schedule entry").await?;
        let credit_id = entry_row.lock().await.credit_id;
        let account_row = row(&self.accounts, from, "Account").await?;
        let credit_row = row(&self.credits, credit_id, "Credit").await?;

        let mut account = account_row.lock().await;
        let mut credit = credit_row.lock().await;
        ensure_live(&self.credits, credit_id, &credit_row, "Credit").await?;
        let mut entry = entry_row.lock().await;

        if entry.status.is_paid() {
            return Err(LedgerError::validation(format!(
                "installment {} is already settled",
                entry_id
            )));
        }
        if account.owner != credit.owner {
            return Err(LedgerError::validation(format!(
                "account {} does not belong to the borrower of credit {}",
                from, credit_id
            )));
        }

        let debited = account.checked_delta(-entry.amount, policy)?;
        let mut journal = self.journal.lock().await;

        account.balance = debited;
        credit.record_payment(entry.amount);
        entry.status = PaymentStatus::Paid { paid_at };
        journal.push(LedgerEntry::new(
            from,
            -entry.amount,
            EntryKind::InstallmentPayment,
        ));

        Ok(entry.clone())
    }
}
