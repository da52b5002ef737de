use chrono::{Datelike, Months, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Fiscal years start in September unless configured otherwise.
pub const DEFAULT_FISCAL_START_MONTH: u32 = 9;

const LONG_MONTH_YEAR: &str = "%B %Y";

/// Accepted spellings for explicit `--start`/`--end` dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y", "%B %d %Y",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("can't extract date range from {filename}")]
    Unparseable { filename: String },

    #[error("invalid fiscal quarter {0:?}, expected the form Q[1234]/YYYY, e.g. Q4/2016")]
    BadQuarter(String),

    #[error("invalid date {0:?}")]
    BadDate(String),

    #[error("fiscal year start month must be 1-12, got {0}")]
    BadStartMonth(u32),

    #[error("start date {start} is after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },

    #[error("date out of range")]
    OutOfRange,
}

/// Inclusive calendar date range a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(DateRange { start, end })
    }

    /// "January 2023 to March 2023"
    pub fn long_label(&self) -> String {
        format!(
            "{} to {}",
            self.start.format(LONG_MONTH_YEAR),
            self.end.format(LONG_MONTH_YEAR)
        )
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// A quarter of a fiscal year, e.g. Q2 of FY2023.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiscalQuarter {
    pub year: i32,
    pub quarter: u32,
}

impl FiscalQuarter {
    pub fn new(year: i32, quarter: u32) -> Option<Self> {
        (1..=4)
            .contains(&quarter)
            .then_some(FiscalQuarter { year, quarter })
    }
}

impl fmt::Display for FiscalQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}/{}", self.quarter, self.year)
    }
}

impl FromStr for FiscalQuarter {
    type Err = DateRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = quarter_arg_pattern()
            .captures(s.trim())
            .ok_or_else(|| DateRangeError::BadQuarter(s.to_string()))?;
        let quarter: u32 = caps[1]
            .parse()
            .map_err(|_| DateRangeError::BadQuarter(s.to_string()))?;
        let year: i32 = caps[2]
            .parse()
            .map_err(|_| DateRangeError::BadQuarter(s.to_string()))?;
        FiscalQuarter::new(year, quarter).ok_or_else(|| DateRangeError::BadQuarter(s.to_string()))
    }
}

/// Fiscal calendar whose year begins on the first day of `start_month`.
///
/// Fiscal year `Y` is named after the calendar year it ends in: with a September start,
/// FY2023 runs from 2022-09-01 to 2023-08-31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiscalCalendar {
    start_month: u32,
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        FiscalCalendar {
            start_month: DEFAULT_FISCAL_START_MONTH,
        }
    }
}

impl FiscalCalendar {
    pub fn new(start_month: u32) -> Result<Self, DateRangeError> {
        if !(1..=12).contains(&start_month) {
            return Err(DateRangeError::BadStartMonth(start_month));
        }
        Ok(FiscalCalendar { start_month })
    }

    pub fn start_month(&self) -> u32 {
        self.start_month
    }

    fn year_start(&self, fiscal_year: i32) -> Result<NaiveDate, DateRangeError> {
        let calendar_year = if self.start_month == 1 {
            fiscal_year
        } else {
            fiscal_year - 1
        };
        NaiveDate::from_ymd_opt(calendar_year, self.start_month, 1).ok_or(DateRangeError::OutOfRange)
    }

    /// First and last day of a fiscal quarter
    pub fn quarter_range(&self, fq: FiscalQuarter) -> Result<DateRange, DateRangeError> {
        if !(1..=4).contains(&fq.quarter) {
            return Err(DateRangeError::BadQuarter(fq.to_string()));
        }
        let start = self
            .year_start(fq.year)?
            .checked_add_months(Months::new(3 * (fq.quarter - 1)))
            .ok_or(DateRangeError::OutOfRange)?;
        let end = start
            .checked_add_months(Months::new(3))
            .and_then(|next| next.pred_opt())
            .ok_or(DateRangeError::OutOfRange)?;
        DateRange::new(start, end)
    }

    /// Fiscal quarter containing `date`
    pub fn quarter_of(&self, date: NaiveDate) -> FiscalQuarter {
        let year = if self.start_month != 1 && date.month() >= self.start_month {
            date.year() + 1
        } else {
            date.year()
        };
        let months_in = (date.month() + 12 - self.start_month) % 12;
        FiscalQuarter {
            year,
            quarter: months_in / 3 + 1,
        }
    }

    /// The complete fiscal quarter before the one containing `today`
    pub fn previous_quarter(&self, today: NaiveDate) -> Result<DateRange, DateRangeError> {
        let current = self.quarter_range(self.quarter_of(today))?;
        let last_day_before = current.start.pred_opt().ok_or(DateRangeError::OutOfRange)?;
        self.quarter_range(self.quarter_of(last_day_before))
    }
}

/// Parse a user-supplied date. Besides the formats in `DATE_FORMATS`,
/// `today` and `yesterday` are understood relative to `today`.
pub fn parse_date(text: &str, today: NaiveDate) -> Result<NaiveDate, DateRangeError> {
    let trimmed = text.trim();
    match trimmed.to_lowercase().as_str() {
        "today" => return Ok(today),
        "yesterday" => return today.pred_opt().ok_or(DateRangeError::OutOfRange),
        _ => {}
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| DateRangeError::BadDate(text.to_string()))
}

/// Extract the human-readable reporting period from an artifact filename.
///
/// Understands `..._Q2_2023.csv` (fiscal quarter) and
/// `..._2023-01-01_2023-03-31.csv` (explicit dates).
pub fn date_range_from_filename(
    path: &Path,
    calendar: &FiscalCalendar,
) -> Result<String, DateRangeError> {
    let filename = path.to_string_lossy().to_string();
    let unparseable = || DateRangeError::Unparseable {
        filename: filename.clone(),
    };

    if let Some(caps) = quarter_file_pattern().captures(&filename) {
        let quarter: u32 = caps[1].parse().map_err(|_| unparseable())?;
        let year: i32 = caps[2].parse().map_err(|_| unparseable())?;
        let fq = FiscalQuarter::new(year, quarter).ok_or_else(unparseable)?;
        return Ok(calendar.quarter_range(fq)?.long_label());
    }

    if let Some(caps) = dates_file_pattern().captures(&filename) {
        let start = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").map_err(|_| unparseable())?;
        let end = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").map_err(|_| unparseable())?;
        return Ok(format!(
            "{} to {}",
            start.format(LONG_MONTH_YEAR),
            end.format(LONG_MONTH_YEAR)
        ));
    }

    Err(unparseable())
}

fn quarter_arg_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Q([1-4])[/_\-](\d{4})$").expect("valid regex"))
}

fn quarter_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)_Q([1-4])_(\d{4})\.csv$").expect("valid regex"))
}

fn dates_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)_(\d{4}-\d{2}-\d{2})_(\d{4}-\d{2}-\d{2})\.csv").expect("valid regex")
    })
}
