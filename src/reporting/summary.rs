use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use super::window::ReportingWindow;
use super::InvoiceRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTotals {
    pub quantity: Decimal,
    pub amount: Decimal,
    pub cost: Decimal,
}

impl CategoryTotals {
    pub fn profit(&self) -> Decimal {
        self.amount.saturating_sub(self.cost)
    }

    pub fn margin_percent(&self) -> Decimal {
        percent_of(self.profit(), self.amount)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentTotals {
    pub transactions: usize,
    pub amount: Decimal,
}

/// Orders and invoice amount for one service type (dine-in, takeaway, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTotals {
    pub orders: usize,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTotals {
    pub item: String,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub cost: Decimal,
}

impl ItemTotals {
    pub fn profit(&self) -> Decimal {
        self.amount.saturating_sub(self.cost)
    }
}

/// `part / whole * 100`, 0 when `whole` is not positive or the ratio is out
/// of range.
fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .unwrap_or(Decimal::ZERO)
}

/// Figures for one reporting window. Amounts are exact sums; rounding is left
/// to presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub window: ReportingWindow,
    pub total_revenue: Decimal,
    pub transaction_count: usize,
    pub line_count: usize,
    pub items_sold: Decimal,
    pub total_cost: Decimal,
    pub by_category: BTreeMap<String, CategoryTotals>,
    pub by_payment: BTreeMap<String, PaymentTotals>,
    pub by_day: BTreeMap<NaiveDate, Decimal>,
    pub top_items: Vec<ItemTotals>,
    pub growth_percent: Option<Decimal>,

    /// Invoice figures, filled only when an invoice table is read.
    pub total_vat: Decimal,
    pub by_service: BTreeMap<String, ServiceTotals>,
    pub invoices: Vec<InvoiceRecord>,
}

impl ReportSummary {
    pub fn empty(window: ReportingWindow) -> ReportSummary {
        ReportSummary {
            window,
            total_revenue: Decimal::ZERO,
            transaction_count: 0,
            line_count: 0,
            items_sold: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            by_category: BTreeMap::new(),
            by_payment: BTreeMap::new(),
            by_day: BTreeMap::new(),
            top_items: Vec::new(),
            growth_percent: None,
            total_vat: Decimal::ZERO,
            by_service: BTreeMap::new(),
            invoices: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line_count == 0
    }

    pub fn has_invoices(&self) -> bool {
        !self.invoices.is_empty()
    }

    pub fn profit(&self) -> Decimal {
        self.total_revenue.saturating_sub(self.total_cost)
    }

    pub fn average_transaction(&self) -> Decimal {
        if self.transaction_count == 0 {
            return Decimal::ZERO;
        }

        self.total_revenue / Decimal::from(self.transaction_count)
    }

    pub fn category_subtotals(&self) -> BTreeMap<String, Decimal> {
        self.by_category
            .iter()
            .map(|(category, totals)| (category.clone(), totals.amount))
            .collect()
    }

    /// Categories by amount descending, ties by label ascending.
    pub fn categories_ranked(&self) -> Vec<(&str, &CategoryTotals)> {
        let mut ranked: Vec<_> = self
            .by_category
            .iter()
            .map(|(category, totals)| (category.as_str(), totals))
            .collect();
        ranked.sort_by(|a, b| b.1.amount.cmp(&a.1.amount).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    /// Percentage of the total revenue, 0 when nothing was sold.
    pub fn share_percent(&self, amount: Decimal) -> Decimal {
        percent_of(amount, self.total_revenue)
    }

    /// Percentage of the invoiced amount across all service types.
    pub fn service_share_percent(&self, amount: Decimal) -> Decimal {
        let invoiced = self
            .by_service
            .values()
            .try_fold(Decimal::ZERO, |sum, totals| sum.checked_add(totals.amount))
            .unwrap_or(Decimal::ZERO);
        percent_of(amount, invoiced)
    }

    /// Service types by amount descending, ties by label ascending.
    pub fn services_ranked(&self) -> Vec<(&str, &ServiceTotals)> {
        let mut ranked: Vec<_> = self
            .by_service
            .iter()
            .map(|(service, totals)| (service.as_str(), totals))
            .collect();
        ranked.sort_by(|a, b| b.1.amount.cmp(&a.1.amount).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    /// Attaches the revenue growth against a previous window's revenue. A
    /// growth too large to represent is left out.
    pub fn with_previous(mut self, previous_revenue: Decimal) -> ReportSummary {
        self.growth_percent = if previous_revenue.is_zero() {
            None
        } else {
            self.total_revenue
                .checked_sub(previous_revenue)
                .and_then(|change| change.checked_div(previous_revenue))
                .and_then(|ratio| ratio.checked_mul(dec!(100)))
                .map(|growth| growth.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero))
        };
        self
    }
}
