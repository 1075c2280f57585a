use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Deserialize;

use super::AggregationError;

/// How the reporting window is derived from "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowKind {
    #[default]
    Yesterday,
    PreviousMonth,
    MonthToDate,
    Explicit,
}

impl WindowKind {
    pub fn resolve(
        self,
        today: NaiveDate,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<ReportingWindow, AggregationError> {
        match self {
            WindowKind::Yesterday => {
                let yesterday = today - Duration::days(1);
                ReportingWindow::new(yesterday, yesterday)
            },
            WindowKind::PreviousMonth => {
                let last = first_of_month(today) - Duration::days(1);
                ReportingWindow::new(first_of_month(last), last)
            },
            WindowKind::MonthToDate => ReportingWindow::new(first_of_month(today), today),
            WindowKind::Explicit => match (start, end) {
                (Some(start), Some(end)) => ReportingWindow::new(start, end),
                _ => Err(AggregationError::MissingBounds),
            },
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

/// Inclusive range of business dates.
///
/// A business day starts at `day_start` and runs until `day_start` of the next
/// calendar day, so a bar open until 04:00 can use `04:00` and keep late sales
/// on the day they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingWindow {
    start: NaiveDate,
    end: NaiveDate,
    day_start: NaiveTime,
}

impl ReportingWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<ReportingWindow, AggregationError> {
        if end < start {
            return Err(AggregationError::InvalidWindow { start, end });
        }

        Ok(ReportingWindow {
            start,
            end,
            day_start: NaiveTime::default(),
        })
    }

    pub fn single_day(date: NaiveDate) -> ReportingWindow {
        ReportingWindow {
            start: date,
            end: date,
            day_start: NaiveTime::default(),
        }
    }

    pub fn with_day_start(mut self, day_start: NaiveTime) -> ReportingWindow {
        self.day_start = day_start;
        self
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn day_start(&self) -> NaiveTime {
        self.day_start
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn business_date(&self, timestamp: NaiveDateTime) -> NaiveDate {
        let offset = Duration::seconds(i64::from(self.day_start.num_seconds_from_midnight()));
        (timestamp - offset).date()
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        let date = self.business_date(timestamp);
        self.start <= date && date <= self.end
    }

    /// The window this one is compared against: the previous calendar month
    /// for a calendar-month window, otherwise the window of equal length that
    /// ends the day before this one starts.
    pub fn previous(&self) -> ReportingWindow {
        let end = self.start - Duration::days(1);
        if self.is_calendar_month() {
            return ReportingWindow {
                start: first_of_month(end),
                end,
                day_start: self.day_start,
            };
        }

        let days = self.days();
        ReportingWindow {
            start: self.start - Duration::days(days),
            end: self.start - Duration::days(1),
            day_start: self.day_start,
        }
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    pub fn is_calendar_month(&self) -> bool {
        let next = self.end + Duration::days(1);
        self.start.day() == 1 && next.day() == 1 && self.start.month() == self.end.month()
    }

    /// Human readable period, e.g. "March 08, 2025" or "November 2025".
    pub fn label(&self) -> String {
        if self.is_single_day() {
            self.start.format("%B %d, %Y").to_string()
        } else if self.is_calendar_month() {
            self.start.format("%B %Y").to_string()
        } else {
            format!("{} to {}", self.start, self.end)
        }
    }

    pub fn file_name(&self) -> String {
        format!("report_{}_{}.pdf", self.start, self.end)
    }
}
