use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::data::{ExtractionError, MdbExport, TableSource};
use crate::dispatch::{DeliveryError, DeliveryResult, Dispatch, Dispatcher};
use crate::render::format;
use crate::render::{RenderError, Renderer, Template};
use crate::reporting::aggregator::Aggregator;
use crate::reporting::normalizer::{Normalizer, PaymentLookup};
use crate::reporting::summary::ReportSummary;
use crate::reporting::window::ReportingWindow;
use crate::reporting::{AggregationError, NormalizationError};
use crate::settings::{ConfigError, Settings};

/// A failure in one stage of the pipeline. Each stage maps to its own exit
/// code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Extraction(_) => "extraction",
            PipelineError::Normalization(_) => "normalization",
            PipelineError::Aggregation(_) => "aggregation",
            PipelineError::Render(_) => "render",
            PipelineError::Delivery(_) => "delivery",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) => 2,
            PipelineError::Extraction(_) => 3,
            PipelineError::Normalization(_) => 4,
            PipelineError::Aggregation(_) => 5,
            PipelineError::Render(_) => 6,
            PipelineError::Delivery(_) => 7,
        }
    }

    /// The failed delivery, for callers that report every outcome as a
    /// `DeliveryResult`.
    pub fn delivery_result(&self) -> Option<DeliveryResult> {
        match self {
            PipelineError::Delivery(err) => Some(DeliveryResult::failed(err)),
            _ => None,
        }
    }
}

/// Overrides from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: ReportSummary,
    pub delivery: DeliveryResult,
    pub skipped_rows: usize,
}

/// The current date in the store's timezone.
pub fn today_in(timezone: Tz) -> NaiveDate {
    Utc::now().with_timezone(&timezone).date_naive()
}

/// Picks the window from CLI dates when given, otherwise from settings.
pub fn resolve_window(
    settings: &Settings,
    options: &RunOptions,
    today: NaiveDate,
) -> Result<ReportingWindow, AggregationError> {
    let window = match (options.from, options.to) {
        (Some(start), Some(end)) => ReportingWindow::new(start, end)?,
        (Some(start), None) => ReportingWindow::new(start, start)?,
        (None, Some(end)) => ReportingWindow::new(end, end)?,
        (None, None) => settings
            .window
            .kind
            .resolve(today, settings.window.start, settings.window.end)?,
    };

    Ok(window.with_day_start(settings.window.day_start))
}

/// Runs extract, normalize, aggregate, render and dispatch in order against
/// one table source. Nothing is dispatched unless rendering succeeded.
pub struct Runner<'a, S: TableSource + ?Sized> {
    settings: &'a Settings,
    source: &'a S,
    dispatcher: &'a Dispatcher,
}

impl<'a, S: TableSource + ?Sized> Runner<'a, S> {
    pub fn new(settings: &'a Settings, source: &'a S, dispatcher: &'a Dispatcher) -> Self {
        Runner {
            settings,
            source,
            dispatcher,
        }
    }

    /// Runs the pipeline once. A failure is logged here, once, with its stage.
    pub fn run(&self, window: ReportingWindow) -> Result<RunOutcome, PipelineError> {
        self.execute(window)
            .inspect_err(|err| error!("{} stage failed: {}", err.stage(), err))
    }

    fn execute(&self, window: ReportingWindow) -> Result<RunOutcome, PipelineError> {
        let settings = self.settings;
        info!("building report, store={} period={}", settings.store.name, window.label());

        let sales = self.source.extract(&settings.database.sales_table)?;
        let invoice_rows = match settings.database.invoice_table() {
            Some(table) => Some(self.source.extract(table)?),
            None => None,
        };
        let payments = invoice_rows.as_deref().map(|rows| {
            PaymentLookup::from_rows(rows, &settings.mapping.invoice_id, &settings.mapping.invoice_payment)
        });

        let normalizer = Normalizer::new(
            settings.mapping.clone(),
            settings.normalizer.mode,
            settings.normalizer.tolerance,
        )?
        .with_payments(payments);

        let mut current = Aggregator::new(window).with_top_items(settings.report.top_items);
        let mut previous_revenue = Decimal::ZERO;
        let previous = window.previous();

        let mut records = normalizer.normalize(sales);
        for record in records.by_ref() {
            let record = record?;
            if !current.push(&record)? && previous.contains(record.timestamp) {
                previous_revenue = previous_revenue
                    .checked_add(record.amount)
                    .ok_or(AggregationError::Overflow("previous revenue"))?;
            }
        }
        let mut skipped_rows = records.skipped();

        if let Some(rows) = &invoice_rows {
            let (invoices, skipped) = normalizer.normalize_invoices(rows)?;
            skipped_rows += skipped;
            for invoice in &invoices {
                current.push_invoice(invoice)?;
            }
            debug!("invoice rows read, rows={} skipped={}", rows.len(), skipped);
        }

        let mut summary = current.finish();
        if settings.report.compare_previous {
            summary = summary.with_previous(previous_revenue);
        }

        let renderer = Renderer::new(Template::from_settings(settings))?;
        let report = renderer.render(&summary)?;

        let delivery = self.dispatcher.dispatch(&report)?;

        if skipped_rows > 0 {
            warn!("{} sale and invoice rows skipped during normalization", skipped_rows);
        }
        info!(
            "run complete, period={} revenue={} transactions={} lines={} skipped_rows={} status={:?}",
            window.label(),
            format::money(summary.total_revenue),
            summary.transaction_count,
            summary.line_count,
            skipped_rows,
            delivery.status()
        );

        Ok(RunOutcome {
            summary,
            delivery,
            skipped_rows,
        })
    }
}

/// Runs against the configured Access database.
pub fn run(settings: &Settings, options: &RunOptions) -> Result<RunOutcome, PipelineError> {
    let timezone = settings.store.timezone()?;
    let window = resolve_window(settings, options, today_in(timezone))
        .inspect_err(|err| error!("aggregation stage failed: {}", err))?;

    let source = MdbExport::new(&settings.database.path)
        .with_tools(&settings.database.export_tool, &settings.database.tables_tool)
        .with_timeout(settings.database.timeout());
    let dispatcher = Dispatcher::from_settings(settings, options.dry_run)
        .inspect_err(|err| error!("delivery stage failed: {}", err))?;

    Runner::new(settings, &source, &dispatcher).run(window)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::reporting::window::WindowKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = vec![
            PipelineError::from(ConfigError::Timezone("Nowhere".to_owned())),
            PipelineError::from(ExtractionError::TableNotFound("SALE".to_owned())),
            PipelineError::from(NormalizationError::IncompleteMapping),
            PipelineError::from(AggregationError::MissingBounds),
            PipelineError::from(RenderError::UnknownFont("Comic".to_owned())),
            PipelineError::from(DeliveryError::NoRecipients),
        ];

        let codes: BTreeSet<u8> = errors.iter().map(PipelineError::exit_code).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0) && !codes.contains(&1));
        assert_eq!(errors[3].stage(), "aggregation");
        assert_eq!(errors[0].delivery_result(), None);
        assert_eq!(
            errors[5].delivery_result().map(|result| result.status()),
            Some(crate::dispatch::DeliveryStatus::Failed)
        );
    }

    #[test]
    fn test_resolve_window_from_settings() -> Result<()> {
        let mut settings = Settings::default();
        settings.window.kind = WindowKind::PreviousMonth;

        let window = resolve_window(&settings, &RunOptions::default(), date(2025, 12, 1))?;

        assert_eq!((window.start(), window.end()), (date(2025, 11, 1), date(2025, 11, 30)));

        Ok(())
    }

    #[test]
    fn test_cli_dates_win() -> Result<()> {
        let settings = Settings::default();
        let options = RunOptions {
            from: Some(date(2024, 2, 1)),
            to: Some(date(2024, 2, 10)),
            dry_run: false,
        };

        let window = resolve_window(&settings, &options, date(2025, 12, 1))?;
        assert_eq!((window.start(), window.end()), (date(2024, 2, 1), date(2024, 2, 10)));

        let single = RunOptions {
            from: Some(date(2024, 2, 3)),
            ..RunOptions::default()
        };
        let window = resolve_window(&settings, &single, date(2025, 12, 1))?;
        assert!(window.is_single_day());

        let backwards = RunOptions {
            from: Some(date(2024, 2, 10)),
            to: Some(date(2024, 2, 1)),
            dry_run: false,
        };
        assert!(matches!(
            resolve_window(&settings, &backwards, date(2025, 12, 1)),
            Err(AggregationError::InvalidWindow { .. })
        ));

        Ok(())
    }
}
