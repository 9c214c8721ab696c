use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Open,
    Deposit,
    Withdraw,
    Transfer,
    Credit,
}

/// One replayable client operation.
///
/// Accounts and owners are free-form labels; the replayer maps them to ids.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Operation {
    pub r#type: OperationType,
    pub account: String,
    /// Destination account of a transfer.
    pub to: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    /// Annual interest rate of a credit, in percent.
    pub rate: Option<Decimal>,
    pub owner: Option<String>,
}

impl Operation {
    pub fn amount(&self) -> Result<Decimal> {
        self.amount
            .ok_or_else(|| LedgerError::validation(format!("{:?} needs an amount", self.r#type)))
    }

    pub fn destination(&self) -> Result<&str> {
        self.to
            .as_deref()
            .filter(|to| !to.is_empty())
            .ok_or_else(|| LedgerError::validation("transfer needs a destination account"))
    }

    /// Owner label, defaulting to the account label.
    pub fn owner_label(&self) -> &str {
        self.owner
            .as_deref()
            .filter(|owner| !owner.is_empty())
            .unwrap_or(&self.account)
    }
}

/// Reads operations from a CSV source.
///
/// Wraps `csv::Reader`, trimming whitespace and accepting short records so
/// optional trailing columns can be left out.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes operations; a malformed row yields an `Err` and
    /// the stream continues.
    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}
