use crate::error::{LedgerError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

tokio::task_local! {
    static CURRENT: Deadline;
}

/// Caller-supplied point in time after which an operation is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// The deadline of the innermost [`run`](Self::run) driving the current
    /// task, if any. Adapters that block outside the async poll loop use it
    /// to bound their own waits.
    pub fn current() -> Option<Deadline> {
        CURRENT.try_with(|deadline| *deadline).ok()
    }

    /// Runs `fut` until the deadline.
    ///
    /// An expired deadline fails without polling `fut`. Store futures only
    /// write after their last suspension point, so dropping one on expiry
    /// leaves state unchanged. `fut` sees this deadline through
    /// [`Deadline::current`].
    pub async fn run<T, F>(self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_expired() {
            return Err(LedgerError::Timeout(format!(
                "{} not started: deadline already passed",
                operation
            )));
        }
        match tokio::time::timeout_at(self.0, CURRENT.scope(self, fut)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(format!(
                "{} exceeded its deadline",
                operation
            ))),
        }
    }
}
