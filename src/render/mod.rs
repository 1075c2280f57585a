use std::path::PathBuf;

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use log::{debug, info};
use thiserror::Error;

use crate::reporting::summary::ReportSummary;
use crate::reporting::window::ReportingWindow;
use crate::settings::Settings;

pub mod assets;
pub mod format;
mod layout;


use assets::{check_font, Jpeg};
use layout::{build_document, Assets, Column, Layout, Table};

/// Bumped whenever the page layout changes.
pub const TEMPLATE_VERSION: u32 = 2;

const EMPTY_NOTICE: &str = "No sales recorded for this period.";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown font `{0}`, expected one of the standard PDF fonts")]
    UnknownFont(String),
    #[error("template asset not found: {}", .0.display())]
    MissingAsset(PathBuf),
    #[error("template asset {} is unusable: {reason}", path.display())]
    InvalidAsset { path: PathBuf, reason: String },
    #[error("rows per page must be at least 1")]
    InvalidLayout,
    #[error("failed to write pdf: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub store_name: String,
    pub title: String,
    pub rows_per_page: usize,
    pub font: String,
    pub bold_font: String,
    pub logo: Option<PathBuf>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            store_name: "My Store".to_owned(),
            title: "Sales Report".to_owned(),
            rows_per_page: 25,
            font: "Courier".to_owned(),
            bold_font: "Helvetica-Bold".to_owned(),
            logo: None,
        }
    }
}

impl Template {
    pub fn from_settings(settings: &Settings) -> Template {
        Template {
            store_name: settings.store.name.clone(),
            title: settings.report.title.clone(),
            rows_per_page: settings.report.rows_per_page,
            font: settings.report.font.clone(),
            bold_font: settings.report.bold_font.clone(),
            logo: settings.report.logo.clone(),
        }
    }
}

/// A finished document. Only `bytes` goes into the file; everything else is
/// metadata about it.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct RenderedReport {
    #[getset(get = "pub")]
    bytes: Vec<u8>,
    #[getset(get_copy = "pub")]
    generated_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    window: ReportingWindow,
    #[getset(get_copy = "pub")]
    template_version: u32,
    #[getset(get = "pub")]
    title: String,
    #[getset(get = "pub")]
    file_name: String,
}

impl RenderedReport {
    pub(crate) fn new(bytes: Vec<u8>, window: ReportingWindow, title: String) -> RenderedReport {
        RenderedReport {
            bytes,
            generated_at: Utc::now(),
            window,
            template_version: TEMPLATE_VERSION,
            title,
            file_name: window.file_name(),
        }
    }
}

/// Turns summaries into PDF documents using one template.
///
/// Fonts and the logo are checked when the renderer is built, so a broken
/// template fails before any page is laid out.
#[derive(Debug)]
pub struct Renderer {
    template: Template,
    logo: Option<Jpeg>,
}

impl Renderer {
    pub fn new(template: Template) -> Result<Renderer, RenderError> {
        check_font(&template.font)?;
        check_font(&template.bold_font)?;
        if template.rows_per_page == 0 {
            return Err(RenderError::InvalidLayout);
        }

        let logo = template.logo.as_deref().map(Jpeg::load).transpose()?;
        if let Some(logo) = &logo {
            debug!("logo loaded, width={} height={}", logo.width, logo.height);
        }

        Ok(Renderer { template, logo })
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// "Daily Sales Report", "Monthly Sales Report" or the plain title.
    pub fn report_title(&self, window: &ReportingWindow) -> String {
        if window.is_single_day() {
            format!("Daily {}", self.template.title)
        } else if window.is_calendar_month() {
            format!("Monthly {}", self.template.title)
        } else {
            self.template.title.clone()
        }
    }

    pub fn render(&self, summary: &ReportSummary) -> Result<RenderedReport, RenderError> {
        let window = summary.window;
        let title = self.report_title(&window);

        let mut layout = Layout::new();
        if let Some(logo) = &self.logo {
            layout.logo(logo);
        }
        layout.title(&self.template.store_name, 18);
        layout.title(&title, 14);
        layout.paragraph(&format!("Period: {}", window.label()), 10);
        layout.spacer(10);

        if summary.is_empty() {
            layout.heading(EMPTY_NOTICE);
        } else {
            self.totals(&mut layout, summary);
            self.categories(&mut layout, summary);
            self.payments(&mut layout, summary);
            self.services(&mut layout, summary);
            self.daily(&mut layout, summary);
            self.top_items(&mut layout, summary);
            self.invoices(&mut layout, summary);
        }

        let footer = format!(
            "{} - {} - template v{}",
            self.template.store_name,
            window.label(),
            TEMPLATE_VERSION
        );
        let pages = layout.finish(&footer);
        let page_count = pages.len();

        let assets = Assets {
            font: &self.template.font,
            bold_font: &self.template.bold_font,
            logo: self.logo.as_ref(),
        };
        let bytes = build_document(pages, &assets, &format!("{} - {}", title, window.label()))?;

        info!(
            "report rendered, file={} pages={} bytes={}",
            window.file_name(),
            page_count,
            bytes.len()
        );
        Ok(RenderedReport::new(bytes, window, title))
    }

    fn totals(&self, layout: &mut Layout, summary: &ReportSummary) {
        layout.heading("Summary");
        layout.key_value("Total revenue", &format::money(summary.total_revenue));
        layout.key_value("Transactions", &format::count(summary.transaction_count));
        layout.key_value("Average transaction", &format::money(summary.average_transaction()));
        layout.key_value("Items sold", &format::quantity(summary.items_sold));
        layout.key_value("Total cost", &format::money(summary.total_cost));
        layout.key_value("Profit", &format::money(summary.profit()));
        if summary.has_invoices() {
            layout.key_value("Total VAT collected", &format::money(summary.total_vat));
        }
        if let Some(growth) = summary.growth_percent {
            layout.key_value("Change vs previous period", &format::signed_percent(growth));
        }
        layout.spacer(10);
    }

    fn categories(&self, layout: &mut Layout, summary: &ReportSummary) {
        let rows = summary
            .categories_ranked()
            .into_iter()
            .map(|(category, totals)| {
                vec![
                    category.to_owned(),
                    format::quantity(totals.quantity),
                    format::money(totals.amount),
                    format::percent(summary.share_percent(totals.amount)),
                    format::money(totals.profit()),
                ]
            })
            .collect();

        let table = Table {
            columns: vec![
                Column::left("Category", 175),
                Column::right("Qty", 60),
                Column::right("Revenue", 90),
                Column::right("Share", 80),
                Column::right("Profit", 90),
            ],
            rows,
        };

        layout.heading("Sales by category");
        layout.table(&table, Some(self.template.rows_per_page));
    }

    fn payments(&self, layout: &mut Layout, summary: &ReportSummary) {
        if summary.by_payment.is_empty() {
            return;
        }

        let mut methods: Vec<_> = summary.by_payment.iter().collect();
        methods.sort_by(|a, b| b.1.amount.cmp(&a.1.amount).then_with(|| a.0.cmp(b.0)));

        let table = Table {
            columns: vec![
                Column::left("Payment method", 175),
                Column::right("Transactions", 90),
                Column::right("Amount", 90),
                Column::right("Share", 80),
            ],
            rows: methods
                .into_iter()
                .map(|(method, totals)| {
                    vec![
                        method.clone(),
                        format::count(totals.transactions),
                        format::money(totals.amount),
                        format::percent(summary.share_percent(totals.amount)),
                    ]
                })
                .collect(),
        };

        layout.heading("Payment methods");
        layout.table(&table, None);
    }

    fn services(&self, layout: &mut Layout, summary: &ReportSummary) {
        if summary.by_service.is_empty() {
            return;
        }

        let table = Table {
            columns: vec![
                Column::left("Service type", 175),
                Column::right("Orders", 90),
                Column::right("Amount", 90),
                Column::right("Share", 80),
            ],
            rows: summary
                .services_ranked()
                .into_iter()
                .map(|(service, totals)| {
                    vec![
                        service.to_owned(),
                        format::count(totals.orders),
                        format::money(totals.amount),
                        format::percent(summary.service_share_percent(totals.amount)),
                    ]
                })
                .collect(),
        };

        layout.heading("Service types");
        layout.table(&table, None);
    }

    fn daily(&self, layout: &mut Layout, summary: &ReportSummary) {
        if summary.by_day.len() < 2 {
            return;
        }

        let table = Table {
            columns: vec![Column::left("Business day", 175), Column::right("Revenue", 90)],
            rows: summary
                .by_day
                .iter()
                .map(|(date, amount)| vec![date.format("%a %Y-%m-%d").to_string(), format::money(*amount)])
                .collect(),
        };

        layout.heading("Daily revenue");
        layout.table(&table, None);
    }

    fn top_items(&self, layout: &mut Layout, summary: &ReportSummary) {
        if summary.top_items.is_empty() {
            return;
        }

        let table = Table {
            columns: vec![
                Column::right("#", 30),
                Column::left("Item", 175),
                Column::right("Qty", 60),
                Column::right("Revenue", 90),
                Column::right("Profit", 90),
            ],
            rows: summary
                .top_items
                .iter()
                .enumerate()
                .map(|(rank, item)| {
                    vec![
                        (rank + 1).to_string(),
                        item.item.clone(),
                        format::quantity(item.quantity),
                        format::money(item.amount),
                        format::money(item.profit()),
                    ]
                })
                .collect(),
        };

        layout.heading("Top items");
        layout.table(&table, None);
    }

    fn invoices(&self, layout: &mut Layout, summary: &ReportSummary) {
        if !summary.has_invoices() {
            return;
        }

        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        let table = Table {
            columns: vec![
                Column::left("Date", 75),
                Column::left("Invoice", 45),
                Column::left("Table", 35),
                Column::left("Waiter", 60),
                Column::right("Amount", 55),
                Column::right("Discount", 50),
                Column::right("Service", 50),
                Column::right("VAT", 45),
                Column::right("Total", 55),
            ],
            rows: summary
                .invoices
                .iter()
                .map(|invoice| {
                    vec![
                        invoice.timestamp.format("%m-%d %H:%M").to_string(),
                        invoice.invoice_id.clone(),
                        text(&invoice.table),
                        text(&invoice.waiter),
                        format::money(invoice.amount),
                        format::money(invoice.discount),
                        format::money(invoice.service),
                        format::money(invoice.vat),
                        format::money(invoice.total),
                    ]
                })
                .collect(),
        };

        layout.heading("Invoices");
        layout.table(&table, Some(self.template.rows_per_page));
    }
}
