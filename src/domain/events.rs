use super::account::EntryKind;
use super::ids::{AccountId, CreditId, ScheduleEntryId};
use rust_decimal::Decimal;
use serde::Serialize;

/// Events emitted after a ledger or credit transaction has committed.
#[derive(Debug, Serialize, PartialEq, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    PaymentCompleted {
        account_id: AccountId,
        amount: Decimal,
        kind: EntryKind,
    },
    PenaltyApplied {
        credit_id: CreditId,
        entry_id: ScheduleEntryId,
        penalty: Decimal,
        outstanding: Decimal,
    },
}
