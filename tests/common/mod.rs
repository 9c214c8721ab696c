#![allow(dead_code)]

use bank_core::application::analytics::AnalyticsService;
use bank_core::application::credit::CreditIssuer;
use bank_core::application::deadline::Deadline;
use bank_core::application::ledger::LedgerService;
use bank_core::application::overdue::OverdueProcessor;
use bank_core::config::CreditSettings;
use bank_core::domain::account::{Account, OverdraftPolicy};
use bank_core::domain::ids::UserId;
use bank_core::infrastructure::in_memory::InMemoryStore;
use bank_core::infrastructure::notify::TracingNotifier;
use bank_core::infrastructure::rates::FixedRateSource;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub const OPS_HEADER: &str = "type, account, to, amount, currency, rate, owner";

/// Writes an operations CSV with the standard header.
pub fn ops_file(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", OPS_HEADER).unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    file.flush().unwrap();
    file
}

pub fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(10))
}

/// Services wired over one shared in-memory store.
pub struct Bank {
    pub store: InMemoryStore,
    pub ledger: LedgerService,
    pub credits: CreditIssuer,
    pub overdue: OverdueProcessor,
    pub analytics: AnalyticsService,
}

impl Bank {
    pub fn new() -> Self {
        let store = InMemoryStore::new();
        let notifier = Arc::new(TracingNotifier);
        Self {
            ledger: LedgerService::new(Arc::new(store.clone()), notifier.clone(), OverdraftPolicy::Forbid),
            credits: CreditIssuer::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                notifier.clone(),
                Arc::new(FixedRateSource::new(dec!(16))),
                CreditSettings::default(),
                OverdraftPolicy::Forbid,
            ),
            overdue: OverdueProcessor::new(
                Arc::new(store.clone()),
                notifier,
                dec!(0.10),
                Duration::from_secs(10),
            ),
            analytics: AnalyticsService::new(Arc::new(store.clone()), Arc::new(store.clone()), dec!(50)),
            store,
        }
    }

    pub async fn open(&self, balance: Decimal) -> Account {
        self.open_for(UserId::new(), balance).await
    }

    pub async fn open_for(&self, owner: UserId, balance: Decimal) -> Account {
        self.ledger
            .create_account(owner, "RUB", balance, deadline())
            .await
            .unwrap()
    }

    pub async fn balance(&self, account: &Account) -> Decimal {
        self.ledger
            .get_account(account.id, deadline())
            .await
            .unwrap()
            .balance
            .value()
    }
}
