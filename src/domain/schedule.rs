use super::ids::{CreditId, ScheduleEntryId};
use super::money::round_money;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of an installment.
///
/// `Unpaid` is the only non-terminal state. It leaves either through an
/// on-time payment or through the overdue processor; both count as paid.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Default)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid {
        paid_at: DateTime<Utc>,
    },
    Penalized {
        penalized_at: DateTime<Utc>,
        penalty: Decimal,
    },
}

impl PaymentStatus {
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Unpaid)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ScheduleEntry {
    pub id: ScheduleEntryId,
    pub credit_id: CreditId,
    pub due_date: DateTime<Utc>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl ScheduleEntry {
    pub fn unpaid(credit_id: CreditId, due_date: DateTime<Utc>, amount: Decimal) -> Self {
        Self {
            id: ScheduleEntryId::new(),
            credit_id,
            due_date,
            amount,
            status: PaymentStatus::Unpaid,
            created_at: Utc::now(),
        }
    }

    /// Unpaid and strictly past due at `as_of`.
    pub fn is_overdue(&self, as_of: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Unpaid && self.due_date < as_of
    }

    /// Late fee for this installment at `rate`, rounded to cents.
    pub fn penalty(&self, rate: Decimal) -> Result<Decimal> {
        self.amount
            .checked_mul(rate)
            .map(round_money)
            .ok_or_else(|| {
                LedgerError::validation(format!(
                    "penalty for installment {} exceeds the representable range",
                    self.id
                ))
            })
    }
}

/// Result of one atomic overdue-penalty step.
#[derive(Debug, PartialEq, Clone)]
pub enum PenaltyOutcome {
    Applied {
        credit_id: CreditId,
        penalty: Decimal,
        outstanding: Decimal,
    },
    /// The entry was paid or penalized (or is no longer due) by the time its
    /// row lock was taken; nothing was written.
    AlreadySettled,
}
