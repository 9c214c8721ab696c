use super::deadline::Deadline;
use crate::domain::account::{Account, EntryKind, LedgerEntry, OverdraftPolicy};
use crate::domain::events::LedgerEvent;
use crate::domain::ids::{AccountId, UserId};
use crate::domain::money::{Amount, Balance, Currency};
use crate::domain::ports::{AccountStoreRef, NotifierRef};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Client-facing ledger operations.
///
/// `LedgerService` validates input, bounds every store call by the caller's
/// [`Deadline`] and emits notifications after commit. It holds no balances
/// itself; every call goes to the store.
pub struct LedgerService {
    accounts: AccountStoreRef,
    notifier: NotifierRef,
    overdraft: OverdraftPolicy,
}

impl LedgerService {
    /// Creates a new `LedgerService` instance.
    ///
    /// # Arguments
    ///
    /// * `accounts` - The store for accounts and their journal.
    /// * `notifier` - Sink for post-commit events.
    /// * `overdraft` - Whether balances may go below zero.
    pub fn new(accounts: AccountStoreRef, notifier: NotifierRef, overdraft: OverdraftPolicy) -> Self {
        Self {
            accounts,
            notifier,
            overdraft,
        }
    }

    pub async fn create_account(
        &self,
        owner: UserId,
        currency: &str,
        opening_balance: Decimal,
        deadline: Deadline,
    ) -> Result<Account> {
        let currency = Currency::new(currency)?;
        let account = Account::open(owner, currency, Balance::new(opening_balance))?;
        deadline
            .run("create account", self.accounts.insert(account.clone()))
            .await?;
        info!(account_id = %account.id, %owner, currency = %account.currency, "account created");
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId, deadline: Deadline) -> Result<Account> {
        deadline
            .run("get account", self.accounts.get(id))
            .await?
            .ok_or_else(|| LedgerError::not_found("Account", id))
    }

    pub async fn accounts(&self, deadline: Deadline) -> Result<Vec<Account>> {
        deadline.run("list accounts", self.accounts.all_accounts()).await
    }

    pub async fn history(&self, id: AccountId, deadline: Deadline) -> Result<Vec<LedgerEntry>> {
        deadline.run("account history", self.accounts.history(id)).await
    }

    /// The single balance mutation primitive exposed to callers.
    pub async fn adjust_balance(
        &self,
        id: AccountId,
        delta: Decimal,
        deadline: Deadline,
    ) -> Result<Account> {
        if delta.is_zero() {
            return Err(LedgerError::validation("balance adjustment must be non-zero"));
        }
        let result = deadline
            .run(
                "adjust balance",
                self.accounts.adjust_balance(id, delta, self.overdraft),
            )
            .await;
        match &result {
            Ok(account) => info!(account_id = %id, %delta, balance = %account.balance, "balance adjusted"),
            Err(e) => warn!(account_id = %id, %delta, "balance adjustment failed: {}", e),
        }
        result
    }

    pub async fn deposit(&self, id: AccountId, amount: Decimal, deadline: Deadline) -> Result<Account> {
        let amount = Amount::new(amount)?;
        self.adjust_balance(id, amount.value(), deadline).await
    }

    pub async fn withdraw(&self, id: AccountId, amount: Decimal, deadline: Deadline) -> Result<Account> {
        let amount = Amount::new(amount)?;
        self.adjust_balance(id, -amount.value(), deadline).await
    }

    /// Moves `amount` from `from` to `to`, all-or-nothing.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        deadline: Deadline,
    ) -> Result<(Account, Account)> {
        let amount = Amount::new(amount)?;
        if from == to {
            return Err(LedgerError::validation("cannot transfer to the same account"));
        }

        let result = deadline
            .run(
                "transfer",
                self.accounts.transfer(from, to, amount, self.overdraft),
            )
            .await;

        match result {
            Ok(pair) => {
                info!(%from, %to, %amount, "transfer committed");
                self.notifier.notify(LedgerEvent::PaymentCompleted {
                    account_id: from,
                    amount: amount.value(),
                    kind: EntryKind::TransferOut,
                });
                Ok(pair)
            }
            Err(e) => {
                warn!(%from, %to, %amount, "transfer rejected: {}", e);
                Err(e)
            }
        }
    }
}
