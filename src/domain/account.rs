use super::ids::{AccountId, LedgerEntryId, UserId};
use super::money::{Balance, Currency};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether balance mutations may drive an account below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverdraftPolicy {
    #[default]
    Forbid,
    Allow,
}

impl OverdraftPolicy {
    pub fn from_flag(allow: bool) -> Self {
        if allow { Self::Allow } else { Self::Forbid }
    }
}

/// A ledger account.
///
/// The balance is only changed through [`Account::apply_delta`], which every
/// store mutation primitive funnels through.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    /// The user owning the account.
    pub owner: UserId,
    pub balance: Balance,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn open(owner: UserId, currency: Currency, opening: Balance) -> Result<Self> {
        if owner.is_nil() {
            return Err(LedgerError::validation("account owner is required"));
        }
        if opening.is_negative() {
            return Err(LedgerError::validation("opening balance cannot be negative"));
        }
        Ok(Self {
            id: AccountId::new(),
            owner,
            balance: opening,
            currency,
            created_at: Utc::now(),
        })
    }

    /// Returns the balance that would result from applying `delta`, without
    /// mutating the account.
    pub fn checked_delta(&self, delta: Decimal, policy: OverdraftPolicy) -> Result<Balance> {
        let next = self
            .balance
            .value()
            .checked_add(delta)
            .map(Balance::new)
            .ok_or_else(|| {
                LedgerError::validation(format!(
                    "balance of account {} would exceed the representable range",
                    self.id
                ))
            })?;
        if next.is_negative() && policy == OverdraftPolicy::Forbid {
            return Err(LedgerError::InsufficientFunds {
                account: self.id.to_string(),
                balance: self.balance.value(),
                requested: -delta,
            });
        }
        Ok(next)
    }

    /// Applies a signed delta to the balance.
    pub fn apply_delta(&mut self, delta: Decimal, policy: OverdraftPolicy) -> Result<()> {
        self.balance = self.checked_delta(delta, policy)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Opening,
    Deposit,
    Withdrawal,
    TransferIn,
    TransferOut,
    InstallmentPayment,
}

impl EntryKind {
    /// Kind of a plain balance adjustment, derived from the sign of the delta.
    pub fn for_delta(delta: Decimal) -> Self {
        if delta.is_sign_negative() {
            Self::Withdrawal
        } else {
            Self::Deposit
        }
    }
}

/// One journaled balance movement. Written in the same atomic step as the
/// balance change it records.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub account_id: AccountId,
    /// Signed amount applied to the balance.
    pub amount: Decimal,
    pub kind: EntryKind,
    pub counterparty: Option<AccountId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(account_id: AccountId, amount: Decimal, kind: EntryKind) -> Self {
        Self {
            id: LedgerEntryId::new(),
            account_id,
            amount,
            kind,
            counterparty: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_counterparty(mut self, counterparty: AccountId) -> Self {
        self.counterparty = Some(counterparty);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(balance: Decimal) -> Account {
        Account::open(
            UserId::new(),
            Currency::new("RUB").unwrap(),
            Balance::new(balance),
        )
        .unwrap()
    }

    #[test]
    fn test_open_rejects_nil_owner() {
        let result = Account::open(
            UserId(uuid::Uuid::nil()),
            Currency::new("RUB").unwrap(),
            Balance::ZERO,
        );
        assert!(matches!(result, Err(LedgerError::ValidationError(_))));
    }

    #[test]
    fn test_open_rejects_negative_opening() {
        let result = Account::open(
            UserId::new(),
            Currency::new("RUB").unwrap(),
            Balance::new(dec!(-1)),
        );
        assert!(matches!(result, Err(LedgerError::ValidationError(_))));
    }

    #[test]
    fn test_apply_delta_deposit() {
        let mut acc = account(dec!(0));
        acc.apply_delta(dec!(10.5), OverdraftPolicy::Forbid).unwrap();
        assert_eq!(acc.balance, Balance::new(dec!(10.5)));
    }

    #[test]
    fn test_apply_delta_insufficient() {
        let mut acc = account(dec!(10.0));
        let result = acc.apply_delta(dec!(-20.0), OverdraftPolicy::Forbid);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds { requested, .. }) if requested == dec!(20.0)
        ));
        assert_eq!(acc.balance, Balance::new(dec!(10.0)));
    }

    #[test]
    fn test_apply_delta_overdraft_allowed() {
        let mut acc = account(dec!(10.0));
        acc.apply_delta(dec!(-20.0), OverdraftPolicy::Allow).unwrap();
        assert_eq!(acc.balance, Balance::new(dec!(-10.0)));
    }

    #[test]
    fn test_withdraw_to_exactly_zero() {
        let mut acc = account(dec!(10.0));
        acc.apply_delta(dec!(-10.0), OverdraftPolicy::Forbid).unwrap();
        assert_eq!(acc.balance, Balance::ZERO);
    }

    #[test]
    fn test_apply_delta_overflow_is_rejected() {
        let mut acc = account(dec!(1));
        let result = acc.apply_delta(Decimal::MAX, OverdraftPolicy::Forbid);
        assert!(matches!(result, Err(LedgerError::ValidationError(_))));
        assert_eq!(acc.balance, Balance::new(dec!(1)));

        let mut overdrawn = account(dec!(0));
        overdrawn.balance = Balance::new(Decimal::MIN);
        assert!(overdrawn.apply_delta(dec!(-1), OverdraftPolicy::Allow).is_err());
    }

    #[test]
    fn test_entry_kind_for_delta() {
        assert_eq!(EntryKind::for_delta(dec!(5)), EntryKind::Deposit);
        assert_eq!(EntryKind::for_delta(dec!(-5)), EntryKind::Withdrawal);
    }
}
