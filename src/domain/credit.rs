use super::ids::{AccountId, CreditId, UserId};
use super::money::round_money;
use super::schedule::ScheduleEntry;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Months, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

/// Fixed monthly installment of an annuity loan.
///
/// `payment = P * r / (1 - (1 + r)^-T)` with `r = annual% / 100 / T`,
/// evaluated as `P * r * (1 + r)^T / ((1 + r)^T - 1)` so the power stays
/// positive. A zero rate degrades to `P / T`. Rounded to cents.
pub fn monthly_payment(principal: Decimal, annual_rate_percent: Decimal, term: u32) -> Result<Decimal> {
    if term == 0 {
        return Err(LedgerError::validation("credit term must be at least one month"));
    }
    let periods = Decimal::from(term);
    let monthly_rate = annual_rate_percent / Decimal::ONE_HUNDRED / periods;

    if monthly_rate.is_zero() {
        return Ok(round_money(principal / periods));
    }

    let overflow = || LedgerError::validation("credit terms exceed fixed-point range");
    let growth = (Decimal::ONE + monthly_rate)
        .checked_powu(u64::from(term))
        .ok_or_else(overflow)?;
    let payment = principal
        .checked_mul(monthly_rate)
        .and_then(|v| v.checked_mul(growth))
        .and_then(|v| v.checked_div(growth - Decimal::ONE))
        .ok_or_else(overflow)?;

    Ok(round_money(payment))
}

/// A credit obligation issued against a funding account.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Credit {
    pub id: CreditId,
    pub owner: UserId,
    pub account_id: AccountId,
    pub principal: Decimal,
    /// Nominal annual interest rate, in percent.
    pub annual_rate: Decimal,
    pub term_months: u32,
    pub monthly_payment: Decimal,
    pub created_at: DateTime<Utc>,
    /// Remaining amount owed. Grows with penalties, shrinks with payments.
    pub outstanding: Decimal,
}

impl Credit {
    /// Builds a credit and its full amortization schedule.
    ///
    /// Nothing is persisted here; the caller stores both halves atomically.
    pub fn issue(
        owner: UserId,
        account_id: AccountId,
        principal: Decimal,
        annual_rate: Decimal,
        term_months: u32,
    ) -> Result<(Self, Vec<ScheduleEntry>)> {
        if principal <= Decimal::ZERO {
            return Err(LedgerError::validation("principal must be positive"));
        }
        if annual_rate.is_sign_negative() && !annual_rate.is_zero() {
            return Err(LedgerError::validation("interest rate cannot be negative"));
        }

        let payment = monthly_payment(principal, annual_rate, term_months)?;
        let created_at = Utc::now();
        let id = CreditId::new();

        let schedule = (1..=term_months)
            .map(|month| {
                let due_date = created_at
                    .checked_add_months(Months::new(month))
                    .ok_or_else(|| LedgerError::validation("due date out of range"))?;
                Ok(ScheduleEntry::unpaid(id, due_date, payment))
            })
            .collect::<Result<Vec<_>>>()?;

        let outstanding = payment
            .checked_mul(Decimal::from(term_months))
            .ok_or_else(|| LedgerError::validation("credit terms exceed fixed-point range"))?;

        let credit = Self {
            id,
            owner,
            account_id,
            principal,
            annual_rate,
            term_months,
            monthly_payment: payment,
            created_at,
            outstanding,
        };
        Ok((credit, schedule))
    }

    /// Adds `penalty` to the outstanding amount. Leaves the credit untouched
    /// if the sum is not representable.
    pub fn add_penalty(&mut self, penalty: Decimal) -> Result<()> {
        self.outstanding = self.outstanding.checked_add(penalty).ok_or_else(|| {
            LedgerError::validation(format!(
                "outstanding of credit {} would exceed the representable range",
                self.id
            ))
        })?;
        Ok(())
    }

    /// Applies an installment payment; outstanding never drops below zero.
    pub fn record_payment(&mut self, amount: Decimal) {
        self.outstanding = (self.outstanding - amount).max(Decimal::ZERO);
    }
}
