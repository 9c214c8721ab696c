use super::deadline::Deadline;
use crate::domain::events::LedgerEvent;
use crate::domain::ids::{CreditId, ScheduleEntryId};
use crate::domain::ports::{CreditStoreRef, NotifierRef};
use crate::domain::schedule::PenaltyOutcome;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// One batch pass the scheduler can drive.
#[async_trait]
pub trait OverdueJob: Send + Sync {
    async fn run(&self, as_of: DateTime<Utc>) -> Result<ProcessingReport>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntry {
    pub entry_id: ScheduleEntryId,
    pub credit_id: CreditId,
    pub cause: String,
}

/// Outcome of one overdue-processing pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingReport {
    pub as_of: DateTime<Utc>,
    /// Entries penalized by this pass.
    pub processed: usize,
    /// Entries that were settled between the overdue read and their lock.
    pub already_settled: usize,
    pub skipped: Vec<SkippedEntry>,
    pub total_penalty: Decimal,
}

impl ProcessingReport {
    fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            processed: 0,
            already_settled: 0,
            skipped: Vec::new(),
            total_penalty: Decimal::ZERO,
        }
    }
}

/// Penalizes every unpaid past-due schedule entry exactly once.
pub struct OverdueProcessor {
    credits: CreditStoreRef,
    notifier: NotifierRef,
    penalty_rate: Decimal,
    op_timeout: Duration,
}

impl OverdueProcessor {
    /// # Arguments
    ///
    /// * `penalty_rate` - Fraction of the installment added to the credit.
    /// * `op_timeout` - Deadline for the overdue read and for each entry step.
    pub fn new(
        credits: CreditStoreRef,
        notifier: NotifierRef,
        penalty_rate: Decimal,
        op_timeout: Duration,
    ) -> Self {
        Self {
            credits,
            notifier,
            penalty_rate,
            op_timeout,
        }
    }

    /// Runs one pass as of `as_of`.
    ///
    /// Only the overdue read can fail the pass. Each entry is its own atomic
    /// store step; failures there are logged and recorded in
    /// [`ProcessingReport::skipped`].
    pub async fn process(&self, as_of: DateTime<Utc>) -> Result<ProcessingReport> {
        let overdue = Deadline::after(self.op_timeout)
            .run("read overdue entries", self.credits.overdue_unpaid(as_of))
            .await?;
        info!(%as_of, candidates = overdue.len(), "overdue processing started");

        let mut report = ProcessingReport::new(as_of);
        for entry in overdue {
            let step = Deadline::after(self.op_timeout)
                .run(
                    "apply penalty",
                    self.credits.apply_penalty(entry.id, self.penalty_rate, as_of),
                )
                .await;

            match step {
                Ok(PenaltyOutcome::Applied {
                    credit_id,
                    penalty,
                    outstanding,
                }) => {
                    report.processed += 1;
                    report.total_penalty += penalty;
                    self.notifier.notify(LedgerEvent::PenaltyApplied {
                        credit_id,
                        entry_id: entry.id,
                        penalty,
                        outstanding,
                    });
                }
                Ok(PenaltyOutcome::AlreadySettled) => report.already_settled += 1,
                Err(e) => {
                    warn!(entry_id = %entry.id, credit_id = %entry.credit_id, "skipping overdue entry: {}", e);
                    report.skipped.push(SkippedEntry {
                        entry_id: entry.id,
                        credit_id: entry.credit_id,
                        cause: e.to_string(),
                    });
                }
            }
        }

        info!(
            %as_of,
            processed = report.processed,
            already_settled = report.already_settled,
            skipped = report.skipped.len(),
            total_penalty = %report.total_penalty,
            "overdue processing finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl OverdueJob for OverdueProcessor {
    async fn run(&self, as_of: DateTime<Utc>) -> Result<ProcessingReport> {
        self.process(as_of).await
    }
}
