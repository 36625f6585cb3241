//! Date windows for programs, project periods and internships

use crate::errors::{AppError, Result};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Open-ended availability window of a program or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub valid_from: NaiveDate,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
}

impl ValidityWindow {
    pub fn new(valid_from: NaiveDate, valid_until: Option<NaiveDate>) -> Result<Self> {
        if valid_until.is_some_and(|until| until < valid_from) {
            return Err(AppError::validation(
                "valid_until",
                "must not be before valid_from",
            ));
        }
        Ok(Self {
            valid_from,
            valid_until,
        })
    }

    pub fn is_valid_on(&self, day: NaiveDate) -> bool {
        self.valid_from <= day && self.valid_until.map_or(true, |until| day <= until)
    }
}

/// Closed date range, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AppError::validation("end_date", "must not be before start_date"));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Length in days, counting both ends
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Whether `day` lies past the end plus a grace period
    pub fn is_closed_after(&self, day: NaiveDate, extension_days: u64) -> bool {
        match self.end.checked_add_days(Days::new(extension_days)) {
            Some(deadline) => day > deadline,
            None => false,
        }
    }

    /// Submissions are accepted from the start until the grace period ends
    pub fn accepts_submissions(&self, day: NaiveDate, extension_days: u64) -> bool {
        self.start <= day && !self.is_closed_after(day, extension_days)
    }
}

/// Custom internship dates override the period they belong to
pub fn resolve_range(
    custom_start: Option<NaiveDate>,
    custom_end: Option<NaiveDate>,
    default: DateRange,
) -> Result<DateRange> {
    DateRange::new(
        custom_start.unwrap_or(default.start),
        custom_end.unwrap_or(default.end),
    )
}
