use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::summary::{CategoryTotals, ItemTotals, PaymentTotals, ReportSummary, ServiceTotals};
use super::window::ReportingWindow;
use super::{AggregationError, InvoiceRecord, SalesRecord};

pub const DEFAULT_TOP_ITEMS: usize = 10;
pub const UNSPECIFIED_PAYMENT: &str = "Unspecified";
pub const UNSPECIFIED_SERVICE: &str = "Unspecified";

fn add(total: &mut Decimal, value: Decimal, name: &'static str) -> Result<(), AggregationError> {
    *total = total.checked_add(value).ok_or(AggregationError::Overflow(name))?;
    Ok(())
}

/// Running totals for a single reporting window.
///
/// Records outside the window are ignored. Sums are kept exact, nothing is
/// rounded until the summary is presented.
#[derive(Debug)]
pub struct Aggregator {
    window: ReportingWindow,
    top_items: usize,

    total_revenue: Decimal,
    total_cost: Decimal,
    items_sold: Decimal,
    line_count: usize,
    ignored: usize,

    transactions: HashSet<String>,
    by_category: BTreeMap<String, CategoryTotals>,
    by_payment: BTreeMap<String, (HashSet<String>, Decimal)>,
    by_item: BTreeMap<String, ItemTotals>,
    by_day: BTreeMap<NaiveDate, Decimal>,
    any_payment: bool,

    total_vat: Decimal,
    by_service: BTreeMap<String, ServiceTotals>,
    invoices: Vec<InvoiceRecord>,
}

impl Aggregator {
    pub fn new(window: ReportingWindow) -> Aggregator {
        Aggregator {
            window,
            top_items: DEFAULT_TOP_ITEMS,
            total_revenue: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            items_sold: Decimal::ZERO,
            line_count: 0,
            ignored: 0,
            transactions: HashSet::new(),
            by_category: BTreeMap::new(),
            by_payment: BTreeMap::new(),
            by_item: BTreeMap::new(),
            by_day: BTreeMap::new(),
            any_payment: false,
            total_vat: Decimal::ZERO,
            by_service: BTreeMap::new(),
            invoices: Vec::new(),
        }
    }

    pub fn with_top_items(mut self, top_items: usize) -> Aggregator {
        self.top_items = top_items;
        self
    }

    pub fn window(&self) -> ReportingWindow {
        self.window
    }

    /// Adds a record to the running totals. Returns `false` when the record
    /// falls outside the window, and an error when a total leaves the
    /// representable range.
    pub fn push(&mut self, record: &SalesRecord) -> Result<bool, AggregationError> {
        if !self.window.contains(record.timestamp) {
            self.ignored += 1;
            return Ok(false);
        }

        add(&mut self.total_revenue, record.amount, "revenue")?;
        add(&mut self.total_cost, record.cost, "cost")?;
        add(&mut self.items_sold, record.quantity, "items sold")?;
        self.line_count += 1;
        self.transactions.insert(record.transaction_id.clone());

        let category = self.by_category.entry(record.category.clone()).or_default();
        add(&mut category.quantity, record.quantity, "category quantity")?;
        add(&mut category.amount, record.amount, "category revenue")?;
        add(&mut category.cost, record.cost, "category cost")?;

        let item = self
            .by_item
            .entry(record.item.clone())
            .or_insert_with(|| ItemTotals {
                item: record.item.clone(),
                quantity: Decimal::ZERO,
                amount: Decimal::ZERO,
                cost: Decimal::ZERO,
            });
        add(&mut item.quantity, record.quantity, "item quantity")?;
        add(&mut item.amount, record.amount, "item revenue")?;
        add(&mut item.cost, record.cost, "item cost")?;

        let method = match &record.payment_method {
            Some(method) => {
                self.any_payment = true;
                method.clone()
            },
            None => UNSPECIFIED_PAYMENT.to_owned(),
        };
        let (ids, amount) = self.by_payment.entry(method).or_default();
        ids.insert(record.transaction_id.clone());
        add(amount, record.amount, "payment amount")?;

        let day = self
            .by_day
            .entry(self.window.business_date(record.timestamp))
            .or_default();
        add(day, record.amount, "daily revenue")?;

        Ok(true)
    }

    /// Adds an invoice header to the VAT and service-type totals and keeps it
    /// for the detail table. Returns `false` when it falls outside the window.
    pub fn push_invoice(&mut self, invoice: &InvoiceRecord) -> Result<bool, AggregationError> {
        if !self.window.contains(invoice.timestamp) {
            return Ok(false);
        }

        add(&mut self.total_vat, invoice.vat, "vat")?;

        let service = invoice
            .service_type
            .clone()
            .unwrap_or_else(|| UNSPECIFIED_SERVICE.to_owned());
        let totals = self.by_service.entry(service).or_default();
        totals.orders += 1;
        add(&mut totals.amount, invoice.amount, "service amount")?;

        self.invoices.push(invoice.clone());
        Ok(true)
    }

    pub fn ignored(&self) -> usize {
        self.ignored
    }

    pub fn finish(self) -> ReportSummary {
        let mut summary = ReportSummary::empty(self.window);
        summary.total_revenue = self.total_revenue;
        summary.total_cost = self.total_cost;
        summary.items_sold = self.items_sold;
        summary.line_count = self.line_count;
        summary.transaction_count = self.transactions.len();
        summary.by_category = self.by_category;
        summary.by_day = self.by_day;
        summary.total_vat = self.total_vat;
        summary.by_service = self.by_service;

        let mut invoices = self.invoices;
        invoices.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.invoice_id.cmp(&b.invoice_id))
        });
        summary.invoices = invoices;

        // A breakdown made only of "Unspecified" says nothing.
        if self.any_payment {
            summary.by_payment = self
                .by_payment
                .into_iter()
                .map(|(method, (ids, amount))| {
                    (
                        method,
                        PaymentTotals {
                            transactions: ids.len(),
                            amount,
                        },
                    )
                })
                .collect();
        }

        let mut items: Vec<ItemTotals> = self.by_item.into_values().collect();
        items.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.item.cmp(&b.item)));
        items.truncate(self.top_items);
        summary.top_items = items;

        summary
    }
}

/// Aggregates `records` over `window` in one pass.
pub fn aggregate<'a, I>(window: ReportingWindow, records: I) -> Result<ReportSummary, AggregationError>
where
    I: IntoIterator<Item = &'a SalesRecord>,
{
    let mut aggregator = Aggregator::new(window);
    for record in records {
        aggregator.push(record)?;
    }

    Ok(aggregator.finish())
}
