//! Trimming old rows from the raw database

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;

use super::result::{Error, Result};
use super::{EngineKind, Variant};

/// Table holding the raw per-request records
pub const RAW_TABLE: &str = "countme_raw";

/// Weeks of recent data kept when no `--keep` is given
pub const DEFAULT_KEEP_WEEKS: u32 = 13;

/// Seconds the operator gets to interrupt before rows are deleted
pub const WARN_SECONDS: u64 = 16;

const WEEK_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Which rows a trim removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimSelection {
    /// Everything older than the newest N weeks, plus a week of margin
    KeepWeeks(u32),
    /// Only the oldest calendar week
    OldestWeek,
}

impl TrimSelection {
    pub fn keep_weeks(weeks: u32) -> Result<Self> {
        if weeks == 0 {
            return Err(Error::invalid_argument(
                "--keep must be a positive number of weeks",
            ));
        }
        Ok(Self::KeepWeeks(weeks))
    }
}

impl Default for TrimSelection {
    fn default() -> Self {
        Self::KeepWeeks(DEFAULT_KEEP_WEEKS)
    }
}

/// Half-open range of unix timestamps `[begin, end)` to delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrimWindow {
    pub begin: i64,
    pub end: i64,
}

impl TrimWindow {
    /// Window for `selection` given the oldest and newest timestamps in the table
    pub fn plan(selection: TrimSelection, min_time: i64, max_time: i64) -> Self {
        let end = match selection {
            TrimSelection::OldestWeek => next_week(min_time),
            TrimSelection::KeepWeeks(weeks) => max_time - (i64::from(weeks) + 1) * WEEK_SECONDS,
        };
        Self {
            begin: min_time,
            end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }
}

/// Start of the week (Monday 00:00 UTC) following the one containing `timestamp`
pub fn next_week(timestamp: i64) -> i64 {
    let day = timestamp.div_euclid(86_400) * 86_400;
    match Utc.timestamp_opt(day, 0).single() {
        Some(midnight) => {
            let monday =
                midnight - Duration::days(i64::from(midnight.weekday().num_days_from_monday()));
            monday.timestamp() + WEEK_SECONDS
        }
        None => timestamp + WEEK_SECONDS,
    }
}

/// Calendar date of a unix timestamp, e.g. `2024-01-29`
pub fn format_day(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.date_naive().to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Outcome of a trim run
#[derive(Debug, Clone, Serialize)]
pub struct TrimReport {
    pub variant: Variant,
    pub engine: EngineKind,
    pub database: PathBuf,
    pub selection: TrimSelection,
    /// `None` when the table was empty
    pub window: Option<TrimWindow>,
    /// Rows inside the window
    pub affected: u64,
    /// Whether the rows were actually deleted
    pub deleted: bool,
}
