use super::deadline::Deadline;
use crate::domain::account::EntryKind;
use crate::domain::ids::{AccountId, UserId};
use crate::domain::ports::{AccountStoreRef, CreditStoreRef};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Cash-flow figures of one user for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub owner: UserId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    /// Deposits minus withdrawals.
    pub net_change: Decimal,
    /// Installments of the user's credits falling due in the month.
    pub scheduled_payments: Decimal,
    /// Share of deposits the scheduled payments would consume, to four
    /// places. Zero when there were no deposits.
    pub credit_load: Decimal,
}

/// Read-only reporting over the journal and the payment schedules.
pub struct AnalyticsService {
    accounts: AccountStoreRef,
    credits: CreditStoreRef,
    daily_outflow: Decimal,
}

/// `[first instant of the month of at, first instant of the next month)`, UTC.
fn month_bounds(at: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = NaiveDate::from_ymd_opt(at.year(), at.month(), 1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|start| start.and_utc());
    let bounds = start.and_then(|start| {
        start
            .checked_add_months(Months::new(1))
            .map(|end| (start, end))
    });
    bounds.ok_or_else(|| LedgerError::validation(format!("no calendar month around {}", at)))
}

fn add(total: Decimal, amount: Decimal) -> Result<Decimal> {
    total
        .checked_add(amount)
        .ok_or_else(|| LedgerError::validation("analytics total exceeds the representable range"))
}

impl AnalyticsService {
    /// # Arguments
    ///
    /// * `daily_outflow` - Spending assumed per day by [`predict_balance`](Self::predict_balance).
    pub fn new(accounts: AccountStoreRef, credits: CreditStoreRef, daily_outflow: Decimal) -> Self {
        Self {
            accounts,
            credits,
            daily_outflow,
        }
    }

    /// Figures for the month (UTC) containing `as_of`.
    ///
    /// Deposits and withdrawals are the journal rows of exactly those kinds
    /// on the user's accounts, from the start of the month up to `as_of`.
    /// Transfers, openings and installment payments are not counted.
    /// Scheduled payments cover every installment due in the month, whatever
    /// its status.
    pub async fn monthly_summary(
        &self,
        owner: UserId,
        as_of: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<MonthlySummary> {
        let (period_start, period_end) = month_bounds(as_of)?;

        let accounts = deadline.run("list accounts", self.accounts.all_accounts()).await?;
        let mut total_deposits = Decimal::ZERO;
        let mut total_withdrawals = Decimal::ZERO;
        for account in accounts.iter().filter(|a| a.owner == owner) {
            let history = deadline
                .run("account history", self.accounts.history(account.id))
                .await?;
            for entry in history
                .iter()
                .filter(|e| e.created_at >= period_start && e.created_at <= as_of)
            {
                match entry.kind {
                    EntryKind::Deposit => total_deposits = add(total_deposits, entry.amount)?,
                    EntryKind::Withdrawal => {
                        total_withdrawals = add(total_withdrawals, entry.amount.abs())?
                    }
                    _ => {}
                }
            }
        }

        let credits = deadline
            .run("list credits", self.credits.credits_for_user(owner))
            .await?;
        let mut scheduled_payments = Decimal::ZERO;
        for credit in &credits {
            let schedule = deadline
                .run("credit schedule", self.credits.schedule_for(credit.id))
                .await?;
            for entry in schedule
                .iter()
                .filter(|e| e.due_date >= period_start && e.due_date < period_end)
            {
                scheduled_payments = add(scheduled_payments, entry.amount)?;
            }
        }

        let credit_load = if total_deposits.is_zero() {
            Decimal::ZERO
        } else {
            scheduled_payments
                .checked_div(total_deposits)
                .map(|load| load.round_dp(4))
                .ok_or_else(|| LedgerError::validation("credit load exceeds the representable range"))?
        };

        Ok(MonthlySummary {
            owner,
            period_start,
            period_end,
            total_deposits,
            total_withdrawals,
            net_change: total_deposits - total_withdrawals,
            scheduled_payments,
            credit_load,
        })
    }

    /// Naive projection: the current balance minus a flat daily outflow.
    pub async fn predict_balance(
        &self,
        account_id: AccountId,
        days: u32,
        deadline: Deadline,
    ) -> Result<Decimal> {
        let account = deadline
            .run("get account", self.accounts.get(account_id))
            .await?
            .ok_or_else(|| LedgerError::not_found("Account", account_id))?;

        self.daily_outflow
            .checked_mul(Decimal::from(days))
            .and_then(|spent| account.balance.value().checked_sub(spent))
            .ok_or_else(|| LedgerError::validation("projected balance exceeds the representable range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(date).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_month_bounds() {
        let (start, end) = month_bounds(at("2024-02-15T13:45:00Z")).unwrap();
        assert_eq!(start, at("2024-02-01T00:00:00Z"));
        assert_eq!(end, at("2024-03-01T00:00:00Z"));

        let (start, end) = month_bounds(at("2024-12-31T23:59:59Z")).unwrap();
        assert_eq!(start, at("2024-12-01T00:00:00Z"));
        assert_eq!(end, at("2025-01-01T00:00:00Z"));
    }
}
