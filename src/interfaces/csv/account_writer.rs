use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// Final state of one account as reported to the caller.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct AccountRow {
    pub account: String,
    pub owner: String,
    pub currency: String,
    pub balance: Decimal,
    /// Sum of the outstanding amounts of credits funded through this account.
    pub outstanding_credit: Decimal,
}

/// Writes account rows as CSV with a header line.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, rows: impl IntoIterator<Item = AccountRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let mut out = Vec::new();
        AccountWriter::new(&mut out)
            .write_accounts(vec![AccountRow {
                account: "alice".into(),
                owner: "alice".into(),
                currency: "RUB".into(),
                balance: dec!(75.50),
                outstanding_credit: dec!(1279.44),
            }])
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "account,owner,currency,balance,outstanding_credit\nalice,alice,RUB,75.50,1279.44\n"
        );
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let mut out = Vec::new();
        AccountWriter::new(&mut out).write_accounts(Vec::new()).unwrap();
        assert!(out.is_empty());
    }
}
