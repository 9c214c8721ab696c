//! Configuration loading and validation.
//!
//! Sources, later ones winning: built-in defaults, an optional TOML file,
//! then `BANK_CORE__<SECTION>__<KEY>` environment variables.

use crate::domain::account::OverdraftPolicy;
use crate::error::{LedgerError, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ledger: LedgerSettings,
    pub credit: CreditSettings,
    pub scheduler: SchedulerSettings,
    pub storage: StorageSettings,
    pub analytics: AnalyticsSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Lets balances go below zero. Off unless explicitly enabled.
    pub allow_overdraft: bool,
    /// Default deadline for a single ledger or credit operation.
    pub operation_timeout_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            allow_overdraft: false,
            operation_timeout_ms: 5_000,
        }
    }
}

impl LedgerSettings {
    pub fn overdraft(&self) -> OverdraftPolicy {
        OverdraftPolicy::from_flag(self.allow_overdraft)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CreditSettings {
    pub term_months: u32,
    /// Fraction of an overdue installment added to the credit, once per entry.
    pub penalty_rate: Decimal,
    /// Points added on top of the reference key rate.
    pub reference_rate_margin: Decimal,
    /// Reference key rate in percent. Unset means no rate source is reachable.
    pub key_rate: Option<Decimal>,
    /// Annual rate used when the reference rate cannot be obtained.
    pub fallback_rate: Decimal,
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            term_months: 12,
            penalty_rate: dec!(0.10),
            reference_rate_margin: dec!(5),
            key_rate: None,
            fallback_rate: dec!(20),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Wall-clock times (UTC) at which overdue processing fires.
    pub run_at: Vec<NaiveTime>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            run_at: vec![NaiveTime::MIN, NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    /// Spending per day assumed by balance projections.
    pub daily_outflow: Decimal,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            daily_outflow: dec!(50),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: Option<PathBuf>,
    pub lock_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            lock_timeout_ms: 1_000,
        }
    }
}

impl StorageSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Settings {
    /// Load settings from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("BANK_CORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.ledger.operation_timeout_ms == 0 {
            return Err(LedgerError::ConfigError(
                "ledger.operation_timeout_ms must be positive".into(),
            ));
        }
        if self.credit.term_months == 0 || self.credit.term_months > 600 {
            return Err(LedgerError::ConfigError(format!(
                "credit.term_months must be within 1..=600, got {}",
                self.credit.term_months
            )));
        }
        if self.credit.penalty_rate < Decimal::ZERO || self.credit.penalty_rate > Decimal::ONE {
            return Err(LedgerError::ConfigError(format!(
                "credit.penalty_rate must be within [0, 1], got {}",
                self.credit.penalty_rate
            )));
        }
        if self.credit.fallback_rate < Decimal::ZERO {
            return Err(LedgerError::ConfigError(format!(
                "credit.fallback_rate cannot be negative, got {}",
                self.credit.fallback_rate
            )));
        }
        if self.analytics.daily_outflow < Decimal::ZERO {
            return Err(LedgerError::ConfigError(format!(
                "analytics.daily_outflow cannot be negative, got {}",
                self.analytics.daily_outflow
            )));
        }
        if self.scheduler.run_at.is_empty() {
            return Err(LedgerError::ConfigError(
                "scheduler.run_at needs at least one time".into(),
            ));
        }
        if self.storage.lock_timeout_ms == 0 {
            return Err(LedgerError::ConfigError(
                "storage.lock_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_behaviour() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.credit.term_months, 12);
        assert_eq!(settings.credit.penalty_rate, dec!(0.10));
        assert_eq!(settings.ledger.overdraft(), OverdraftPolicy::Forbid);
        assert_eq!(settings.scheduler.run_at.len(), 2);
        assert_eq!(settings.analytics.daily_outflow, dec!(50));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[ledger]\nallow_overdraft = true\n").unwrap();
        writeln!(file, "[credit]\nterm_months = 24\npenalty_rate = \"0.05\"\n").unwrap();
        writeln!(file, "[scheduler]\nrun_at = [\"06:30:00\"]").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert!(settings.ledger.allow_overdraft);
        assert_eq!(settings.credit.term_months, 24);
        assert_eq!(settings.credit.penalty_rate, dec!(0.05));
        assert_eq!(
            settings.scheduler.run_at,
            vec![NaiveTime::from_hms_opt(6, 30, 0).unwrap()]
        );
        assert_eq!(settings.ledger.operation_timeout_ms, 5_000);
    }

    #[test]
    fn test_validate_rejects_bad_penalty() {
        let mut settings = Settings::default();
        settings.credit.penalty_rate = dec!(1.5);
        assert!(matches!(settings.validate(), Err(LedgerError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_empty_schedule() {
        let mut settings = Settings::default();
        settings.scheduler.run_at.clear();
        assert!(settings.validate().is_err());
    }
}
