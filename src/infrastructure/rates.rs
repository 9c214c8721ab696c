use crate::domain::ports::RateSource;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Rate source returning a configured key rate, or failing when none is set.
///
/// The unset variant models an unreachable upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRateSource {
    rate: Option<Decimal>,
}

impl FixedRateSource {
    pub fn new(rate: Decimal) -> Self {
        Self { rate: Some(rate) }
    }

    pub fn unavailable() -> Self {
        Self { rate: None }
    }
}

#[async_trait]
impl RateSource for FixedRateSource {
    async fn key_rate(&self) -> Result<Decimal> {
        self.rate
            .ok_or_else(|| LedgerError::storage("reference rate source unavailable"))
    }
}
