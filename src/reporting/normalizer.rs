use std::collections::HashMap;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::{InvoiceRecord, NormalizationError, SalesRecord};
use crate::data::RawRow;

pub const UNCATEGORIZED: &str = "Uncategorized";
pub const DEFAULT_TOLERANCE: Decimal = dec!(0.01);

/// What to do with a row that cannot be coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Abort on the first bad row.
    #[default]
    Strict,
    /// Skip bad rows and count them.
    Lenient,
}

/// Which raw column feeds which `SalesRecord` field.
///
/// Empty column names count as unmapped, so a settings file can blank out a
/// default with `cost =`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub id: Option<String>,
    pub date: String,
    pub time: Option<String>,
    pub item: String,
    pub category: Option<String>,
    pub quantity: String,
    pub unit_price: Option<String>,
    pub amount: Option<String>,
    pub cost: Option<String>,
    pub payment: Option<String>,
    pub date_format: String,
    pub time_format: String,

    /// Invoice table columns. The id and payment columns also feed the
    /// payment join for sale lines.
    pub invoice_id: String,
    pub invoice_payment: String,
    pub invoice_date: String,
    pub invoice_time: Option<String>,
    pub invoice_amount: String,
    pub invoice_discount: Option<String>,
    pub invoice_service: Option<String>,
    pub invoice_vat: Option<String>,
    pub invoice_total: Option<String>,
    pub invoice_service_type: Option<String>,
    pub invoice_table_no: Option<String>,
    pub invoice_waiter: Option<String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            id: Some("INV_NO".to_owned()),
            date: "DATE".to_owned(),
            time: Some("TIME".to_owned()),
            item: "ITEMS".to_owned(),
            category: Some("CATOGERY".to_owned()),
            quantity: "QTY".to_owned(),
            unit_price: None,
            amount: Some("AMOUNT".to_owned()),
            cost: Some("COST".to_owned()),
            payment: None,
            date_format: "%m/%d/%y %H:%M:%S".to_owned(),
            time_format: "%m/%d/%y %H:%M:%S".to_owned(),
            invoice_id: "INV_NO".to_owned(),
            invoice_payment: "SALE_INFO".to_owned(),
            invoice_date: "DATE".to_owned(),
            invoice_time: Some("TIME".to_owned()),
            invoice_amount: "AMOUNT".to_owned(),
            invoice_discount: Some("DISCOUNT".to_owned()),
            invoice_service: Some("SERVICE".to_owned()),
            invoice_vat: Some("VAT".to_owned()),
            invoice_total: Some("TOTAL".to_owned()),
            invoice_service_type: Some("C_NO".to_owned()),
            invoice_table_no: Some("TABLE_NO".to_owned()),
            invoice_waiter: Some("WAITOR".to_owned()),
        }
    }
}

fn mapped(column: &Option<String>) -> Option<&str> {
    column.as_deref().map(str::trim).filter(|column| !column.is_empty())
}

/// Transaction id to payment method, built from the invoice table.
#[derive(Debug, Clone, Default)]
pub struct PaymentLookup {
    methods: HashMap<String, String>,
}

impl PaymentLookup {
    pub fn from_rows(rows: &[RawRow], id_column: &str, payment_column: &str) -> PaymentLookup {
        let methods = rows
            .iter()
            .filter_map(|row| {
                let id = row.value(id_column)?;
                let method = row.value(payment_column)?;
                Some((id.to_owned(), method.to_owned()))
            })
            .collect::<HashMap<_, _>>();

        debug!("payment lookup built, invoices={}", methods.len());
        PaymentLookup { methods }
    }

    pub fn get(&self, transaction_id: &str) -> Option<&str> {
        self.methods.get(transaction_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    mapping: FieldMapping,
    strictness: Strictness,
    tolerance: Decimal,
    payments: Option<PaymentLookup>,
}

impl Normalizer {
    pub fn new(
        mapping: FieldMapping,
        strictness: Strictness,
        tolerance: Decimal,
    ) -> Result<Normalizer, NormalizationError> {
        if mapped(&mapping.unit_price).is_none() && mapped(&mapping.amount).is_none() {
            return Err(NormalizationError::IncompleteMapping);
        }

        Ok(Normalizer {
            mapping,
            strictness,
            tolerance: tolerance.abs(),
            payments: None,
        })
    }

    pub fn with_payments(mut self, payments: Option<PaymentLookup>) -> Normalizer {
        self.payments = payments;
        self
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// Lazily normalizes `rows`, keeping their order.
    pub fn normalize<I>(&self, rows: I) -> NormalizedRows<'_, I::IntoIter>
    where
        I: IntoIterator<Item = RawRow>,
    {
        NormalizedRows {
            normalizer: self,
            rows: rows.into_iter(),
            ordinal: 0,
            skipped: 0,
            failed: false,
        }
    }

    /// Normalizes a single row. `ordinal` is the 1-based row number, used in
    /// errors and as the transaction id when no id column is mapped.
    pub fn normalize_row(&self, ordinal: usize, row: &RawRow) -> Result<SalesRecord, NormalizationError> {
        let mapping = &self.mapping;

        let transaction_id = mapped(&mapping.id)
            .and_then(|column| row.value(column))
            .map(str::to_owned)
            .unwrap_or_else(|| ordinal.to_string());

        let timestamp = self.timestamp(ordinal, row, &mapping.date, &mapping.time)?;

        let item = required(ordinal, row, &mapping.item)?.to_owned();
        let category = mapped(&mapping.category)
            .and_then(|column| row.value(column))
            .unwrap_or(UNCATEGORIZED)
            .to_owned();

        let quantity = decimal(ordinal, &mapping.quantity, required(ordinal, row, &mapping.quantity)?)?;

        let unit_price = mapped(&mapping.unit_price)
            .map(|column| decimal(ordinal, column, required(ordinal, row, column)?))
            .transpose()?;
        let amount = mapped(&mapping.amount)
            .map(|column| decimal(ordinal, column, required(ordinal, row, column)?))
            .transpose()?;

        let overflow = |column: &str| NormalizationError::Overflow {
            row: ordinal,
            column: column.to_owned(),
        };
        let extended = |unit_price: Decimal| {
            quantity
                .checked_mul(unit_price)
                .ok_or_else(|| overflow(mapping.quantity.as_str()))
        };

        let (unit_price, amount) = match (unit_price, amount) {
            (Some(unit_price), Some(amount)) => {
                let matches = extended(unit_price)?
                    .checked_sub(amount)
                    .is_some_and(|difference| difference.abs() <= self.tolerance);
                if !matches {
                    return Err(NormalizationError::AmountMismatch {
                        row: ordinal,
                        quantity,
                        unit_price,
                        amount,
                    });
                }
                (unit_price, amount)
            },
            (Some(unit_price), None) => (unit_price, extended(unit_price)?),
            (None, Some(amount)) if quantity.is_zero() => {
                if !amount.is_zero() {
                    return Err(NormalizationError::ZeroQuantity { row: ordinal, amount });
                }
                (Decimal::ZERO, amount)
            },
            (None, Some(amount)) => {
                let column = mapped(&mapping.amount).unwrap_or(mapping.quantity.as_str());
                let unit_price = amount.checked_div(quantity).ok_or_else(|| overflow(column))?;
                (unit_price, amount)
            },
            (None, None) => return Err(NormalizationError::IncompleteMapping),
        };

        let cost = optional_decimal(ordinal, row, &mapping.cost)?.unwrap_or(Decimal::ZERO);

        let payment_method = match mapped(&mapping.payment) {
            Some(column) => row.value(column).map(str::to_owned),
            None => self
                .payments
                .as_ref()
                .and_then(|payments| payments.get(&transaction_id))
                .map(str::to_owned),
        };

        Ok(SalesRecord {
            transaction_id,
            timestamp,
            item,
            category,
            quantity,
            unit_price,
            amount,
            cost,
            payment_method,
        })
    }

    /// Normalizes the invoice table in one go, keeping row order.
    ///
    /// Returns the invoices and the number of rows skipped in lenient mode.
    pub fn normalize_invoices(&self, rows: &[RawRow]) -> Result<(Vec<InvoiceRecord>, usize), NormalizationError> {
        let mut invoices = Vec::with_capacity(rows.len());
        let mut skipped = 0;

        for (index, row) in rows.iter().enumerate() {
            match self.normalize_invoice(index + 1, row) {
                Ok(invoice) => invoices.push(invoice),
                Err(err) if self.strictness == Strictness::Lenient => {
                    warn!("skipping invoice row, err={}", err);
                    skipped += 1;
                },
                Err(err) => return Err(err),
            }
        }

        debug!("invoices normalized, invoices={} skipped={}", invoices.len(), skipped);
        Ok((invoices, skipped))
    }

    pub fn normalize_invoice(&self, ordinal: usize, row: &RawRow) -> Result<InvoiceRecord, NormalizationError> {
        let mapping = &self.mapping;

        let invoice_id = row
            .value(&mapping.invoice_id)
            .map(str::to_owned)
            .unwrap_or_else(|| ordinal.to_string());
        let timestamp = self.timestamp(ordinal, row, &mapping.invoice_date, &mapping.invoice_time)?;
        let text = |column: &Option<String>| mapped(column).and_then(|column| row.value(column)).map(str::to_owned);

        let amount = decimal(
            ordinal,
            &mapping.invoice_amount,
            required(ordinal, row, &mapping.invoice_amount)?,
        )?;
        let discount = optional_decimal(ordinal, row, &mapping.invoice_discount)?.unwrap_or(Decimal::ZERO);
        let service = optional_decimal(ordinal, row, &mapping.invoice_service)?.unwrap_or(Decimal::ZERO);
        let vat = optional_decimal(ordinal, row, &mapping.invoice_vat)?.unwrap_or(Decimal::ZERO);

        let total = match optional_decimal(ordinal, row, &mapping.invoice_total)? {
            Some(total) => total,
            None => amount
                .checked_sub(discount)
                .and_then(|net| net.checked_add(service))
                .and_then(|net| net.checked_add(vat))
                .ok_or_else(|| NormalizationError::Overflow {
                    row: ordinal,
                    column: mapping.invoice_amount.clone(),
                })?,
        };

        Ok(InvoiceRecord {
            invoice_id,
            timestamp,
            table: text(&mapping.invoice_table_no),
            waiter: text(&mapping.invoice_waiter),
            service_type: text(&mapping.invoice_service_type),
            payment_method: row.value(&mapping.invoice_payment).map(str::to_owned),
            amount,
            discount,
            service,
            vat,
            total,
        })
    }

    fn timestamp(
        &self,
        ordinal: usize,
        row: &RawRow,
        date_column: &str,
        time_column: &Option<String>,
    ) -> Result<NaiveDateTime, NormalizationError> {
        let mapping = &self.mapping;
        let raw_date = required(ordinal, row, date_column)?;
        let date = parse_datetime(raw_date, &mapping.date_format).ok_or_else(|| NormalizationError::InvalidDate {
            row: ordinal,
            column: date_column.to_owned(),
            value: raw_date.to_owned(),
        })?;

        // The legacy schema keeps the time of day in its own column.
        let Some(column) = mapped(time_column) else {
            return Ok(date);
        };
        let Some(raw_time) = row.value(column) else {
            return Ok(date);
        };
        let time = parse_time(raw_time, &mapping.time_format).ok_or_else(|| NormalizationError::InvalidDate {
            row: ordinal,
            column: column.to_owned(),
            value: raw_time.to_owned(),
        })?;

        Ok(date.date().and_time(time))
    }
}

fn required<'r>(ordinal: usize, row: &'r RawRow, column: &str) -> Result<&'r str, NormalizationError> {
    row.value(column).ok_or_else(|| NormalizationError::MissingValue {
        row: ordinal,
        column: column.to_owned(),
    })
}

/// Parses a mapped column that may be blank; unmapped or blank gives `None`.
fn optional_decimal(ordinal: usize, row: &RawRow, column: &Option<String>) -> Result<Option<Decimal>, NormalizationError> {
    match mapped(column).and_then(|column| row.value(column).map(|value| (column, value))) {
        Some((column, value)) => decimal(ordinal, column, value).map(Some),
        None => Ok(None),
    }
}

fn decimal(ordinal: usize, column: &str, value: &str) -> Result<Decimal, NormalizationError> {
    parse_decimal(value).ok_or_else(|| NormalizationError::InvalidNumber {
        row: ordinal,
        column: column.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

fn parse_datetime(value: &str, format: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, format)
        .ok()
        .or_else(|| NaiveDate::parse_from_str(value, format).ok().map(|date| date.and_time(NaiveTime::default())))
}

fn parse_time(value: &str, format: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, format)
        .map(|datetime| datetime.time())
        .or_else(|_| NaiveTime::parse_from_str(value, format))
        .ok()
}

/// Iterator returned by [`Normalizer::normalize`].
///
/// In strict mode the first bad row is yielded as an error and iteration ends.
/// In lenient mode bad rows are logged, counted and skipped.
#[derive(Debug)]
pub struct NormalizedRows<'a, I> {
    normalizer: &'a Normalizer,
    rows: I,
    ordinal: usize,
    skipped: usize,
    failed: bool,
}

impl<I> NormalizedRows<'_, I> {
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<I> Iterator for NormalizedRows<'_, I>
where
    I: Iterator<Item = RawRow>,
{
    type Item = Result<SalesRecord, NormalizationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let row = self.rows.next()?;
            self.ordinal += 1;

            match self.normalizer.normalize_row(self.ordinal, &row) {
                Ok(record) => return Some(Ok(record)),
                Err(err) => match self.normalizer.strictness {
                    Strictness::Strict => {
                        self.failed = true;
                        return Some(Err(err));
                    },
                    Strictness::Lenient => {
                        warn!("skipping row, err={}", err);
                        self.skipped += 1;
                    },
                },
            }
        }
    }
}
