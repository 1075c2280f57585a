use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use thiserror::Error;

pub mod aggregator;
pub mod normalizer;
pub mod summary;
pub mod window;

#[cfg(test)]
mod normalizer_tests;

#[derive(Debug, PartialEq, Error)]
pub enum NormalizationError {
    #[error("field mapping needs a unit price or an amount column")]
    IncompleteMapping,
    #[error("row {row}: missing value for column `{column}`")]
    MissingValue { row: usize, column: String },
    #[error("row {row}: column `{column}` is not a number: `{value}`")]
    InvalidNumber { row: usize, column: String, value: String },
    #[error("row {row}: column `{column}` is not a valid date: `{value}`")]
    InvalidDate { row: usize, column: String, value: String },
    #[error("row {row}: amount {amount} does not match {quantity} x {unit_price}")]
    AmountMismatch {
        row: usize,
        quantity: Decimal,
        unit_price: Decimal,
        amount: Decimal,
    },
    #[error("row {row}: amount {amount} for zero quantity")]
    ZeroQuantity { row: usize, amount: Decimal },
    #[error("row {row}: `{column}` is out of range")]
    Overflow { row: usize, column: String },
}

#[derive(Debug, PartialEq, Error)]
pub enum AggregationError {
    #[error("reporting window ends ({end}) before it starts ({start})")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },
    #[error("explicit reporting window requires both a start and an end date")]
    MissingBounds,
    #[error("running total for {0} is out of range")]
    Overflow(&'static str),
}

/// One normalized sale line.
///
/// `amount` always equals `quantity * unit_price` within the tolerance the
/// normalizer was configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct SalesRecord {
    pub transaction_id: String,
    pub timestamp: NaiveDateTime,
    pub item: String,
    pub category: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub cost: Decimal,
    pub payment_method: Option<String>,
}

impl SalesRecord {
    pub fn profit(&self) -> Decimal {
        self.amount.saturating_sub(self.cost)
    }
}

/// One invoice header from the invoice table.
///
/// `total` is the mapped total column when present, otherwise
/// `amount - discount + service + vat`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRecord {
    pub invoice_id: String,
    pub timestamp: NaiveDateTime,
    pub table: Option<String>,
    pub waiter: Option<String>,
    pub service_type: Option<String>,
    pub payment_method: Option<String>,
    pub amount: Decimal,
    pub discount: Decimal,
    pub service: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}
