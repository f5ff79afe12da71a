//! Calendar buckets used for date partitioning
//!
//! A range is packed into a single `u32`:
//! `mode * 10_000_000 + year * 1000 + range`, where `range` is the ordinal of
//! the bucket inside the year (half, quarter, month, week or day). The packed
//! number orders ranges of the same mode chronologically and prints as eight
//! decimal digits, which is how partition column families are named.
//! The packed value `0` is the null range.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

const MODE_FACTOR: u32 = 10_000_000;
const YEAR_FACTOR: u32 = 1000;

/// Bucket granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RangeMode {
    Year = 0,
    HalfYear = 1,
    Quarter = 2,
    Month = 3,
    Week = 4,
    Day = 5,
}

impl RangeMode {
    fn from_number(n: u32) -> Option<Self> {
        match n {
            0 => Some(RangeMode::Year),
            1 => Some(RangeMode::HalfYear),
            2 => Some(RangeMode::Quarter),
            3 => Some(RangeMode::Month),
            4 => Some(RangeMode::Week),
            5 => Some(RangeMode::Day),
            _ => None,
        }
    }

    fn max_range(self) -> u32 {
        match self {
            RangeMode::Year => 1,
            RangeMode::HalfYear => 2,
            RangeMode::Quarter => 4,
            RangeMode::Month => 12,
            RangeMode::Week => 53,
            RangeMode::Day => 366,
        }
    }
}

impl FromStr for RangeMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "year" => Ok(RangeMode::Year),
            "halfyear" | "half-year" | "half_year" => Ok(RangeMode::HalfYear),
            "quarter" => Ok(RangeMode::Quarter),
            "month" => Ok(RangeMode::Month),
            "week" => Ok(RangeMode::Week),
            "day" => Ok(RangeMode::Day),
            other => Err(CoreError::InvalidDateRange(format!("unknown mode {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateRange(u32);

impl DateRange {
    pub const fn null() -> Self {
        DateRange(0)
    }

    pub fn new(mode: RangeMode, year: i32, range: u32) -> CoreResult<Self> {
        if !(1..=9999).contains(&year) {
            return Err(CoreError::InvalidDateRange(format!("year {} out of range", year)));
        }
        if range == 0 || range > mode.max_range() {
            return Err(CoreError::InvalidDateRange(format!(
                "range {} invalid for {:?}",
                range, mode
            )));
        }
        Ok(DateRange(mode as u32 * MODE_FACTOR + year as u32 * YEAR_FACTOR + range))
    }

    pub fn from_value(value: u32) -> CoreResult<Self> {
        if value == 0 {
            return Ok(Self::null());
        }
        let mode = RangeMode::from_number(value / MODE_FACTOR)
            .ok_or_else(|| CoreError::InvalidDateRange(value.to_string()))?;
        Self::new(mode, ((value / YEAR_FACTOR) % 10_000) as i32, value % YEAR_FACTOR)
    }

    /// The bucket of `mode` containing `date`. Years outside 1..=9999 do not
    /// fit the packed form and are rejected.
    pub fn from_date(date: NaiveDate, mode: RangeMode) -> CoreResult<Self> {
        let month = date.month();
        let range = match mode {
            RangeMode::Year => 1,
            RangeMode::HalfYear => (month - 1) / 6 + 1,
            RangeMode::Quarter => (month - 1) / 3 + 1,
            RangeMode::Month => month,
            RangeMode::Week => (date.ordinal() - 1) / 7 + 1,
            RangeMode::Day => date.ordinal(),
        };
        Self::new(mode, date.year(), range)
    }

    pub fn from_datetime(dt: DateTime<Utc>, mode: RangeMode) -> CoreResult<Self> {
        Self::from_date(dt.date_naive(), mode)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn mode(&self) -> RangeMode {
        RangeMode::from_number(self.0 / MODE_FACTOR).unwrap_or(RangeMode::Year)
    }

    pub fn year(&self) -> i32 {
        ((self.0 / YEAR_FACTOR) % 10_000) as i32
    }

    pub fn range(&self) -> u32 {
        self.0 % YEAR_FACTOR
    }

    /// First day of the bucket.
    pub fn begin(&self) -> NaiveDate {
        let year = self.year();
        let range = self.range();
        let date = match self.mode() {
            RangeMode::Year => NaiveDate::from_ymd_opt(year, 1, 1),
            RangeMode::HalfYear => NaiveDate::from_ymd_opt(year, (range - 1) * 6 + 1, 1),
            RangeMode::Quarter => NaiveDate::from_ymd_opt(year, (range - 1) * 3 + 1, 1),
            RangeMode::Month => NaiveDate::from_ymd_opt(year, range, 1),
            RangeMode::Week => NaiveDate::from_ymd_opt(year, 1, 1)
                .map(|d| d + Duration::days(((range - 1) * 7) as i64)),
            RangeMode::Day => NaiveDate::from_yo_opt(year, range),
        };
        date.unwrap_or(NaiveDate::MIN)
    }

    /// Last day of the bucket, inclusive.
    pub fn end(&self) -> NaiveDate {
        let year = self.year();
        let range = self.range();
        let date = match self.mode() {
            RangeMode::Year => NaiveDate::from_ymd_opt(year, 12, 31),
            RangeMode::HalfYear => month_end(year, range * 6),
            RangeMode::Quarter => month_end(year, range * 3),
            RangeMode::Month => month_end(year, range),
            RangeMode::Week => {
                let last = NaiveDate::from_ymd_opt(year, 12, 31);
                last.map(|last| (self.begin() + Duration::days(6)).min(last))
            }
            RangeMode::Day => NaiveDate::from_yo_opt(year, range),
        };
        date.unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        !self.is_null() && self.begin() <= date && date <= self.end()
    }

    /// Whether any day of `[from, to]` falls into this bucket.
    pub fn intersects(&self, from: NaiveDate, to: NaiveDate) -> bool {
        !self.is_null() && self.begin() <= to && from <= self.end()
    }

    /// All buckets of `mode` covering `[from, to]`, in chronological order.
    pub fn ranges_between(
        from: NaiveDate,
        to: NaiveDate,
        mode: RangeMode,
    ) -> CoreResult<Vec<DateRange>> {
        let mut ranges = Vec::new();
        if from > to {
            return Ok(ranges);
        }
        let mut current = Self::from_date(from, mode)?;
        loop {
            ranges.push(current);
            let next_day = current.end() + Duration::days(1);
            if next_day > to {
                break;
            }
            current = Self::from_date(next_day, mode)?;
        }
        Ok(ranges)
    }
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next.map(|d| d - Duration::days(1))
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

impl FromStr for DateRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .parse::<u32>()
            .map_err(|_| CoreError::InvalidDateRange(s.to_string()))?;
        Self::from_value(value)
    }
}
