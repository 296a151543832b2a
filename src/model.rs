//! Source-side domain types handed to the reconciliation core.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use sumac_api::DayEntry;

use crate::error::SyncError;

/// A Harvest time entry reduced to what the sync needs. Immutable for the length of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceEntry {
    pub id: u64,
    pub user_id: u64,
    pub project_id: u64,
    pub client_id: Option<u64>,
    pub notes: String,
    pub spent_on: NaiveDate,
    pub hours: f64,
    pub billable: bool,
}

impl From<DayEntry> for SourceEntry {
    fn from(entry: DayEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user.id,
            project_id: entry.project.id,
            client_id: entry.client.map(|client| client.id),
            notes: entry.notes.unwrap_or_default(),
            spent_on: entry.spent_date,
            hours: entry.hours,
            billable: entry.billable,
        }
    }
}

/// Inclusive range of days a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, SyncError> {
        if from > to {
            return Err(SyncError::InvalidRange(format!("{}:{}", from, to)));
        }
        Ok(Self { from, to })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    pub fn today() -> Self {
        Self::single(Local::now().date_naive())
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from <= day && day <= self.to
    }
}

impl FromStr for DateRange {
    type Err = SyncError;

    /// Accepts `YYYYMMDD`, `YYYY-MM-DD`, or two of those joined by `:`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let invalid = || SyncError::InvalidRange(trimmed.to_string());
        match trimmed.split_once(':') {
            Some((from, to)) => {
                let from = parse_day(from).ok_or_else(invalid)?;
                let to = parse_day(to).ok_or_else(invalid)?;
                DateRange::new(from, to)
            }
            None => parse_day(trimmed).map(DateRange::single).ok_or_else(invalid),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{} to {}", self.from, self.to)
        }
    }
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}
