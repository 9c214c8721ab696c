use bank_core::application::analytics::AnalyticsService;
use bank_core::application::credit::CreditIssuer;
use bank_core::application::deadline::Deadline;
use bank_core::application::ledger::LedgerService;
use bank_core::application::overdue::OverdueProcessor;
use bank_core::application::scheduler::{Cadence, OverdueScheduler};
use bank_core::config::{Settings, StorageSettings};
use bank_core::domain::ids::{AccountId, UserId};
use bank_core::domain::ports::{AccountStoreRef, CreditStoreRef};
use bank_core::error::{LedgerError, Result as LedgerResult};
use bank_core::infrastructure::in_memory::InMemoryStore;
use bank_core::infrastructure::notify::TracingNotifier;
use bank_core::infrastructure::rates::FixedRateSource;
use bank_core::interfaces::csv::account_writer::{AccountRow, AccountWriter};
use bank_core::interfaces::csv::operation_reader::{Operation, OperationReader, OperationType};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML). Environment variables `BANK_CORE__*` override it.
    #[arg(long, global = true, env = "BANK_CORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a CSV of operations and print the resulting accounts
    Replay {
        /// Input operations CSV file
        input: PathBuf,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Run overdue processing as of this RFC 3339 instant after the replay
        #[arg(long)]
        process_overdue_at: Option<DateTime<Utc>>,

        /// Log each owner's cash-flow summary for the current month
        #[arg(long)]
        monthly_summary: bool,
    },
    /// Run the overdue scheduler until Ctrl-C
    Serve {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bank_core=info")),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).into_diagnostic()?;

    match cli.command {
        Command::Replay {
            input,
            db_path,
            process_overdue_at,
            monthly_summary,
        } => {
            if db_path.is_some() {
                settings.storage.db_path = db_path;
            }
            replay(&settings, &input, process_overdue_at, monthly_summary).await
        }
        Command::Serve { db_path } => {
            if db_path.is_some() {
                settings.storage.db_path = db_path;
            }
            serve(&settings).await
        }
    }
}

fn in_memory() -> (AccountStoreRef, CreditStoreRef) {
    let store = InMemoryStore::new();
    (Arc::new(store.clone()), Arc::new(store))
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(storage: &StorageSettings) -> Result<(AccountStoreRef, CreditStoreRef)> {
    use bank_core::infrastructure::rocksdb::RocksDBStore;

    match &storage.db_path {
        Some(path) => {
            let store = RocksDBStore::open(path, storage.lock_timeout()).into_diagnostic()?;
            info!(path = %path.display(), "using RocksDB storage");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(storage: &StorageSettings) -> Result<(AccountStoreRef, CreditStoreRef)> {
    if let Some(path) = &storage.db_path {
        warn!(
            path = %path.display(),
            "RocksDB support is not compiled in (enable the storage-rocksdb feature), falling back to in-memory storage"
        );
    }
    Ok(in_memory())
}

struct Services {
    ledger: LedgerService,
    credits: CreditIssuer,
    overdue: Arc<OverdueProcessor>,
    analytics: AnalyticsService,
    credit_store: CreditStoreRef,
}

fn services(settings: &Settings) -> Result<Services> {
    let (accounts, credit_store) = open_stores(&settings.storage)?;
    let notifier = Arc::new(TracingNotifier);
    let rates = Arc::new(
        settings
            .credit
            .key_rate
            .map(FixedRateSource::new)
            .unwrap_or_else(FixedRateSource::unavailable),
    );
    let overdraft = settings.ledger.overdraft();

    Ok(Services {
        ledger: LedgerService::new(accounts.clone(), notifier.clone(), overdraft),
        analytics: AnalyticsService::new(
            accounts.clone(),
            credit_store.clone(),
            settings.analytics.daily_outflow,
        ),
        credits: CreditIssuer::new(
            accounts,
            credit_store.clone(),
            notifier.clone(),
            rates,
            settings.credit.clone(),
            overdraft,
        ),
        overdue: Arc::new(OverdueProcessor::new(
            credit_store.clone(),
            notifier,
            settings.credit.penalty_rate,
            settings.ledger.operation_timeout(),
        )),
        credit_store,
    })
}

/// Replays labelled operations against the services.
///
/// Labels are local to one replay; the ids they map to are minted on `open`.
struct Replay<'a> {
    services: &'a Services,
    fallback_rate: Decimal,
    timeout: Duration,
    accounts: BTreeMap<String, (AccountId, String)>,
    owners: HashMap<String, UserId>,
}

impl Replay<'_> {
    fn deadline(&self) -> Deadline {
        Deadline::after(self.timeout)
    }

    fn account(&self, label: &str) -> LedgerResult<AccountId> {
        self.accounts
            .get(label)
            .map(|(id, _)| *id)
            .ok_or_else(|| LedgerError::not_found("Account", label))
    }

    fn owner(&mut self, label: &str) -> UserId {
        *self.owners.entry(label.to_string()).or_default()
    }

    async fn apply(&mut self, op: Operation) -> LedgerResult<()> {
        let services = self.services;
        let ledger = &services.ledger;
        match op.r#type {
            OperationType::Open => {
                if self.accounts.contains_key(&op.account) {
                    return Err(LedgerError::validation(format!(
                        "account {} is already open",
                        op.account
                    )));
                }
                let currency = op
                    .currency
                    .as_deref()
                    .ok_or_else(|| LedgerError::validation("open needs a currency"))?;
                let owner_label = op.owner_label().to_string();
                let owner = self.owner(&owner_label);
                let opening = op.amount.unwrap_or(Decimal::ZERO);
                let account = ledger
                    .create_account(owner, currency, opening, self.deadline())
                    .await?;
                self.accounts.insert(op.account, (account.id, owner_label));
            }
            OperationType::Deposit => {
                let id = self.account(&op.account)?;
                ledger.deposit(id, op.amount()?, self.deadline()).await?;
            }
            OperationType::Withdraw => {
                let id = self.account(&op.account)?;
                ledger.withdraw(id, op.amount()?, self.deadline()).await?;
            }
            OperationType::Transfer => {
                let from = self.account(&op.account)?;
                let to = self.account(op.destination()?)?;
                ledger.transfer(from, to, op.amount()?, self.deadline()).await?;
            }
            OperationType::Credit => {
                let (account_id, account_owner) = self
                    .accounts
                    .get(&op.account)
                    .cloned()
                    .ok_or_else(|| LedgerError::not_found("Account", &op.account))?;
                let borrower = match op.owner.as_deref().filter(|o| !o.is_empty()) {
                    Some(label) => self.owner(label),
                    None => self.owner(&account_owner),
                };
                let principal = op.amount()?;
                let issuer = &services.credits;
                match op.rate {
                    Some(rate) => {
                        issuer
                            .apply_for_credit(borrower, account_id, principal, rate, self.deadline())
                            .await?
                    }
                    None => {
                        issuer
                            .apply_at_reference_rate(
                                borrower,
                                account_id,
                                principal,
                                self.fallback_rate,
                                self.deadline(),
                            )
                            .await?
                    }
                };
            }
        }
        Ok(())
    }

    async fn rows(&self) -> LedgerResult<Vec<AccountRow>> {
        let mut rows = Vec::with_capacity(self.accounts.len());
        for (label, (id, owner_label)) in &self.accounts {
            let account = self.services.ledger.get_account(*id, self.deadline()).await?;
            let credits = self
                .services
                .credits
                .credits_for_user(account.owner, self.deadline())
                .await?;
            let outstanding_credit = credits
                .iter()
                .filter(|c| c.account_id == *id)
                .map(|c| c.outstanding)
                .sum();
            rows.push(AccountRow {
                account: label.clone(),
                owner: owner_label.clone(),
                currency: account.currency.to_string(),
                balance: account.balance.value(),
                outstanding_credit,
            });
        }
        Ok(rows)
    }
}

async fn replay(
    settings: &Settings,
    input: &Path,
    process_overdue_at: Option<DateTime<Utc>>,
    monthly_summary: bool,
) -> Result<()> {
    let services = services(settings)?;
    let mut replay = Replay {
        services: &services,
        fallback_rate: settings.credit.fallback_rate,
        timeout: settings.ledger.operation_timeout(),
        accounts: BTreeMap::new(),
        owners: HashMap::new(),
    };

    let file = File::open(input).into_diagnostic()?;
    for (line, op) in OperationReader::new(file).operations().enumerate() {
        match op {
            Ok(op) => {
                let kind = op.r#type;
                if let Err(e) = replay.apply(op).await {
                    warn!(row = line + 1, ?kind, "error processing operation: {}", e);
                }
            }
            Err(e) => warn!(row = line + 1, "error reading operation: {}", e),
        }
    }

    if let Some(as_of) = process_overdue_at {
        let report = services.overdue.process(as_of).await.into_diagnostic()?;
        info!(report = %serde_json::to_string(&report).into_diagnostic()?, "overdue report");
    }

    if monthly_summary {
        let now = Utc::now();
        let owners: BTreeMap<_, _> = replay.owners.iter().collect();
        for (label, owner) in owners {
            let summary = services
                .analytics
                .monthly_summary(*owner, now, replay.deadline())
                .await
                .into_diagnostic()?;
            info!(owner = %label, summary = %serde_json::to_string(&summary).into_diagnostic()?, "monthly summary");
        }
    }

    let rows = replay.rows().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(rows).into_diagnostic()?;

    Ok(())
}

async fn serve(settings: &Settings) -> Result<()> {
    let services = services(settings)?;
    let scheduler = OverdueScheduler::new(
        services.overdue.clone(),
        Cadence::DailyAt(settings.scheduler.run_at.clone()),
    );
    scheduler.start().into_diagnostic()?;

    let pending = Deadline::after(settings.ledger.operation_timeout())
        .run("count overdue", services.credit_store.overdue_unpaid(Utc::now()))
        .await
        .into_diagnostic()?;
    info!(overdue = pending.len(), "serving; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("shutdown requested");
    scheduler.stop().await;
    Ok(())
}
