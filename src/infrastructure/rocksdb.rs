use crate::application::deadline::Deadline;
use crate::domain::account::{Account, EntryKind, LedgerEntry, OverdraftPolicy};
use crate::domain::credit::Credit;
use crate::domain::ids::{AccountId, CreditId, ScheduleEntryId, UserId};
use crate::domain::money::Amount;
use crate::domain::ports::{AccountStore, CreditStore};
use crate::domain::schedule::{PaymentStatus, PenaltyOutcome, ScheduleEntry};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, Transaction,
    TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Column Family for storing account rows.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for the balance journal, keyed by account then time.
pub const CF_JOURNAL: &str = "journal";
/// Column Family for credit rows.
pub const CF_CREDITS: &str = "credits";
/// Column Family for payment schedule entries.
pub const CF_SCHEDULES: &str = "payment_schedules";

type Txn<'db> = Transaction<'db, TransactionDB>;

/// A persistent store implementation using a RocksDB `TransactionDB`.
///
/// Rows are JSON-encoded under their UUID bytes. Mutations run in one
/// pessimistic transaction: rows are read with `get_for_update` in the global
/// order accounts (ascending id), credits, schedule entries, then written and
/// committed. An uncommitted transaction is rolled back on drop.
///
/// All RocksDB calls run on the blocking pool. Lock waits are bounded by the
/// configured lock timeout or by the caller's [`Deadline`], whichever ends
/// first, and surface as [`LedgerError::Timeout`]. A transaction whose
/// deadline passed while it was running is rolled back instead of committed.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<TransactionDB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<TransactionDB>,
    lock_timeout: Duration,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Reads a row and takes its exclusive lock for the rest of the transaction.
fn lock_row<T: DeserializeOwned>(
    txn: &Txn<'_>,
    cf: &ColumnFamily,
    key: &[u8],
    entity: &'static str,
    id: impl ToString,
) -> Result<T> {
    match txn.get_for_update_cf(cf, key, true)? {
        Some(bytes) => decode(&bytes),
        None => Err(LedgerError::not_found(entity, id)),
    }
}

fn journal_key(entry: &LedgerEntry) -> Vec<u8> {
    let nanos = entry.created_at.timestamp_nanos_opt().unwrap_or_default() as u64;
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(entry.account_id.as_bytes());
    key.extend_from_slice(&nanos.to_be_bytes());
    key.extend_from_slice(entry.id.as_bytes());
    key
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every required column family exists.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    /// * `lock_timeout` - Upper bound on waiting for a row lock.
    pub fn open<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(lock_timeout.as_millis() as i64);

        let descriptors = [CF_ACCOUNTS, CF_JOURNAL, CF_CREDITS, CF_SCHEDULES]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = TransactionDB::open_cf_descriptors(&opts, &txn_opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            lock_timeout,
        })
    }

    /// Runs `work` on the blocking pool.
    async fn blocking<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RocksDBStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| LedgerError::storage(format!("{} task failed: {}", operation, e)))?
    }

    /// Runs `body` in one transaction on the blocking pool and commits it
    /// unless the caller's deadline has passed by then.
    async fn in_transaction<T, F>(&self, operation: &'static str, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'db> FnOnce(&'db RocksDBStore, &Txn<'db>) -> Result<T> + Send + 'static,
    {
        let deadline = Deadline::current();
        self.blocking(operation, move |store| {
            let txn = store.begin(operation, deadline)?;
            let value = body(store, &txn)?;
            if deadline.is_some_and(|d| d.is_expired()) {
                return Err(LedgerError::Timeout(format!(
                    "{} rolled back: deadline passed before commit",
                    operation
                )));
            }
            txn.commit()?;
            Ok(value)
        })
        .await
    }

    /// Starts a transaction whose lock waits end no later than `deadline`.
    fn begin(&self, operation: &str, deadline: Option<Deadline>) -> Result<Txn<'_>> {
        let wait = match deadline {
            Some(deadline) if deadline.is_expired() => {
                return Err(LedgerError::Timeout(format!(
                    "{} not started: deadline already passed",
                    operation
                )));
            }
            Some(deadline) => deadline.remaining().min(self.lock_timeout),
            None => self.lock_timeout,
        };
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(wait.as_millis().max(1) as i64);
        Ok(self.db.transaction_opt(&WriteOptions::default(), &txn_opts))
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::storage(format!("{} column family not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (_key, value) = item?;
                decode(&value)
            })
            .collect()
    }

    async fn scan_entries<F>(&self, operation: &'static str, keep: F) -> Result<Vec<ScheduleEntry>>
    where
        F: Fn(&ScheduleEntry) -> bool + Send + 'static,
    {
        self.blocking(operation, move |store| {
            let mut entries: Vec<ScheduleEntry> = store
                .scan::<ScheduleEntry>(CF_SCHEDULES)?
                .into_iter()
                .filter(|e| keep(e))
                .collect();
            entries.sort_by_key(|e| (e.due_date, e.id));
            Ok(entries)
        })
        .await
    }

    fn put_journal(&self, txn: &Txn<'_>, entry: &LedgerEntry) -> Result<()> {
        txn.put_cf(self.cf(CF_JOURNAL)?, journal_key(entry), encode(entry)?)?;
        Ok(())
    }

    fn credit_id_of(&self, entry_id: ScheduleEntryId) -> Result<CreditId> {
        self.read::<ScheduleEntry>(CF_SCHEDULES, entry_id.as_bytes())?
            .map(|e| e.credit_id)
            .ok_or_else(|| LedgerError::not_found("Schedule entry", entry_id))
    }
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn insert(&self, account: Account) -> Result<()> {
        self.in_transaction("insert account", move |store, txn| {
            let cf = store.cf(CF_ACCOUNTS)?;
            if txn.get_for_update_cf(cf, account.id.as_bytes(), true)?.is_some() {
                return Err(LedgerError::validation(format!(
                    "account {} already exists",
                    account.id
                )));
            }
            txn.put_cf(cf, account.id.as_bytes(), encode(&account)?)?;
            if !account.balance.value().is_zero() {
                let opening =
                    LedgerEntry::new(account.id, account.balance.value(), EntryKind::Opening);
                store.put_journal(txn, &opening)?;
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        self.blocking("get account", move |store| store.read(CF_ACCOUNTS, id.as_bytes()))
            .await
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.blocking("list accounts", |store| {
            let mut accounts: Vec<Account> = store.scan(CF_ACCOUNTS)?;
            accounts.sort_by_key(|a| (a.created_at, a.id));
            Ok(accounts)
        })
        .await
    }

    async fn adjust_balance(
        &self,
        id: AccountId,
        delta: Decimal,
        policy: OverdraftPolicy,
    ) -> Result<Account> {
        self.in_transaction("adjust balance", move |store, txn| {
            let cf = store.cf(CF_ACCOUNTS)?;
            let mut account: Account = lock_row(txn, cf, id.as_bytes(), "Account", id)?;

            account.apply_delta(delta, policy)?;
            txn.put_cf(cf, id.as_bytes(), encode(&account)?)?;
            store.put_journal(txn, &LedgerEntry::new(id, delta, EntryKind::for_delta(delta)))?;
            Ok(account)
        })
        .await
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

        let pair = self
            .in_transaction("transfer", move |store, txn| {
                let cf = store.cf(CF_ACCOUNTS)?;
                let (low, high) = if from < to { (from, to) } else { (to, from) };
                let low_account: Account = lock_row(txn, cf, low.as_bytes(), "Account", low)?;
                let high_account: Account = lock_row(txn, cf, high.as_bytes(), "Account", high)?;
                let (mut source, mut dest) = if from < to {
                    (low_account, high_account)
                } else {
                    (high_account, low_account)
                };

                if source.currency != dest.currency {
                    return Err(LedgerError::validation(format!(
                        "currency mismatch: {} -> {}",
                        source.currency, dest.currency
                    )));
                }

                source.apply_delta(-amount.value(), policy)?;
                dest.apply_delta(amount.value(), policy)?;

                txn.put_cf(cf, from.as_bytes(), encode(&source)?)?;
                txn.put_cf(cf, to.as_bytes(), encode(&dest)?)?;
                store.put_journal(
                    txn,
                    &LedgerEntry::new(from, -amount.value(), EntryKind::TransferOut)
                        .with_counterparty(to),
                )?;
                store.put_journal(
                    txn,
                    &LedgerEntry::new(to, amount.value(), EntryKind::TransferIn)
                        .with_counterparty(from),
                )?;
                Ok((source, dest))
            })
            .await?;
        debug!(%from, %to, %amount, "transfer committed");

        Ok(pair)
    }

    async fn history(&self, id: AccountId) -> Result<Vec<LedgerEntry>> {
        self.blocking("account history", move |store| {
            let cf = store.cf(CF_JOURNAL)?;
            let prefix = id.as_bytes();
            let mut entries = Vec::new();
            for item in store
                .db
                .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
            {
                let (key, value) = item?;
                if !key.starts_with(prefix) {
                    break;
                }
                entries.push(decode(&value)?);
            }
            Ok(entries)
        })
        .await
    }
}

#[async_trait]
impl CreditStore for RocksDBStore {
    async fn insert_credit(&self, credit: Credit, schedule: Vec<ScheduleEntry>) -> Result<()> {
        if let Some(stray) = schedule.iter().find(|e| e.credit_id != credit.id) {
            return Err(LedgerError::validation(format!(
                "schedule entry {} belongs to credit {}",
                stray.id, stray.credit_id
            )));
        }

        self.in_transaction("insert credit", move |store, txn| {
            let credits = store.cf(CF_CREDITS)?;
            let schedules = store.cf(CF_SCHEDULES)?;
            if txn.get_for_update_cf(credits, credit.id.as_bytes(), true)?.is_some() {
                return Err(LedgerError::validation(format!(
                    "credit {} already exists",
                    credit.id
                )));
            }
            txn.put_cf(credits, credit.id.as_bytes(), encode(&credit)?)?;
            for entry in &schedule {
                txn.put_cf(schedules, entry.id.as_bytes(), encode(entry)?)?;
            }
            Ok(())
        })
        .await
    }

    async fn get_credit(&self, id: CreditId) -> Result<Option<Credit>> {
        self.blocking("get credit", move |store| store.read(CF_CREDITS, id.as_bytes()))
            .await
    }

    async fn credits_for_user(&self, owner: UserId) -> Result<Vec<Credit>> {
        self.blocking("list credits", move |store| {
            let mut credits: Vec<Credit> = store
                .scan::<Credit>(CF_CREDITS)?
                .into_iter()
                .filter(|c| c.owner == owner)
                .collect();
            credits.sort_by_key(|c| (c.created_at, c.id));
            Ok(credits)
        })
        .await
    }

    async fn get_entry(&self, id: ScheduleEntryId) -> Result<Option<ScheduleEntry>> {
        self.blocking("get schedule entry", move |store| {
            store.read(CF_SCHEDULES, id.as_bytes())
        })
        .await
    }

    async fn schedule_for(&self, credit_id: CreditId) -> Result<Vec<ScheduleEntry>> {
        self.scan_entries("credit schedule", move |e| e.credit_id == credit_id)
            .await
    }

    async fn due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ScheduleEntry>> {
        self.scan_entries("due entries", move |e| e.due_date >= from && e.due_date < to)
            .await
    }

    async fn overdue_unpaid(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduleEntry>> {
        self.scan_entries("overdue entries", move |e| e.is_overdue(as_of))
            .await
    }

    async fn apply_penalty(
        &self,
        entry_id: ScheduleEntryId,
        rate: Decimal,
        as_of: DateTime<Utc>,
    ) -> Result<PenaltyOutcome> {
        self.in_transaction("apply penalty", move |store, txn| {
            let credit_id = store.credit_id_of(entry_id)?;
            let credits = store.cf(CF_CREDITS)?;
            let schedules = store.cf(CF_SCHEDULES)?;

            let mut credit: Credit =
                lock_row(txn, credits, credit_id.as_bytes(), "Credit", credit_id)?;
            let mut entry: ScheduleEntry =
                lock_row(txn, schedules, entry_id.as_bytes(), "Schedule entry", entry_id)?;
            if !entry.is_overdue(as_of) {
                return Ok(PenaltyOutcome::AlreadySettled);
            }

            let penalty = entry.penalty(rate)?;
            credit.add_penalty(penalty)?;
            entry.status = PaymentStatus::Penalized {
                penalized_at: as_of,
                penalty,
            };

            txn.put_cf(credits, credit_id.as_bytes(), encode(&credit)?)?;
            txn.put_cf(schedules, entry_id.as_bytes(), encode(&entry)?)?;
            Ok(PenaltyOutcome::Applied {
                credit_id,
                penalty,
                outstanding: credit.outstanding,
            })
        })
        .await
    }

    async fn settle_installment(
        &self,
        entry_id: ScheduleEntryId,
        from: AccountId,
        policy: OverdraftPolicy,
        paid_at: DateTime<Utc>,
    ) -> Result<ScheduleEntry> {
        self.in_transaction("settle installment", move |store, txn| {
            let credit_id = store.credit_id_of(entry_id)?;
            let accounts = store.cf(CF_ACCOUNTS)?;
            let credits = store.cf(CF_CREDITS)?;
            let schedules = store.cf(CF_SCHEDULES)?;

            let mut account: Account = lock_row(txn, accounts, from.as_bytes(), "Account", from)?;
            let mut credit: Credit =
                lock_row(txn, credits, credit_id.as_bytes(), "Credit", credit_id)?;
            let mut entry: ScheduleEntry =
                lock_row(txn, schedules, entry_id.as_bytes(), "Schedule entry", entry_id)?;

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

            account.apply_delta(-entry.amount, policy)?;
            credit.record_payment(entry.amount);
            entry.status = PaymentStatus::Paid { paid_at };

            txn.put_cf(accounts, from.as_bytes(), encode(&account)?)?;
            txn.put_cf(credits, credit_id.as_bytes(), encode(&credit)?)?;
            txn.put_cf(schedules, entry_id.as_bytes(), encode(&entry)?)?;
            store.put_journal(
                txn,
                &LedgerEntry::new(from, -entry.amount, EntryKind::InstallmentPayment),
            )?;
            Ok(entry)
        })
        .await
    }
}
