use crate::error::{AppError, AppResult};
use chrono::{Days, NaiveDate};
use serde::Serialize;

pub const MIN_ROW_LIMIT: u32 = 1_000;
pub const MAX_ROW_LIMIT: u32 = 250_000;
pub const DEFAULT_ROW_LIMIT: u32 = 25_000;

/// Preset periods ending today, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Period {
    #[value(name = "7")]
    Last7Days,
    #[value(name = "28")]
    Last28Days,
    #[value(name = "90")]
    Last90Days,
}

impl Period {
    pub fn days(self) -> u64 {
        match self {
            Self::Last7Days => 7,
            Self::Last28Days => 28,
            Self::Last90Days => 90,
        }
    }
}

/// Parameters of one report generation. Always validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub row_limit: u32,
}

impl ReportRequest {
    pub fn new(
        start_date: NaiveDate,
        end_date: NaiveDate,
        row_limit: u32,
        today: NaiveDate,
    ) -> AppResult<Self> {
        if start_date > end_date {
            return Err(AppError::invalid_input(format!(
                "Start date {start_date} is after end date {end_date}."
            )));
        }

        if end_date > today {
            return Err(AppError::invalid_input(format!(
                "End date {end_date} is in the future (today is {today})."
            )));
        }

        if !(MIN_ROW_LIMIT..=MAX_ROW_LIMIT).contains(&row_limit) {
            return Err(AppError::invalid_input(format!(
                "Row limit must be between {MIN_ROW_LIMIT} and {MAX_ROW_LIMIT}, got {row_limit}."
            )));
        }

        Ok(Self {
            start_date,
            end_date,
            row_limit,
        })
    }

    pub fn for_period(period: Period, row_limit: u32, today: NaiveDate) -> AppResult<Self> {
        let start_date = today
            .checked_sub_days(Days::new(period.days() - 1))
            .ok_or_else(|| AppError::invalid_input("Date range is out of bounds."))?;
        Self::new(start_date, today, row_limit, today)
    }

    /// Resolves CLI date arguments; no arguments means the last 7 days.
    pub fn from_args(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        period: Option<Period>,
        row_limit: u32,
        today: NaiveDate,
    ) -> AppResult<Self> {
        match (start, end, period) {
            (None, None, period) => {
                Self::for_period(period.unwrap_or(Period::Last7Days), row_limit, today)
            }
            (Some(start), end, None) => Self::new(start, end.unwrap_or(today), row_limit, today),
            (None, Some(_), None) => Err(AppError::invalid_input(
                "`--start` is required when `--end` is given.",
            )),
            (_, _, Some(_)) => Err(AppError::invalid_input(
                "`--last` cannot be combined with `--start` or `--end`.",
            )),
        }
    }

    pub fn start(&self) -> String {
        self.start_date.format("%Y-%m-%d").to_string()
    }

    pub fn end(&self) -> String {
        self.end_date.format("%Y-%m-%d").to_string()
    }
}
