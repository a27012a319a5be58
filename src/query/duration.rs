//! Query durations and time buckets
//!
//! Metrics are downsampled into integer time buckets whose digits are the
//! calendar fields down to the step granularity:
//!
//! ```text
//! Day     2023-01-02            → 20230102
//! Hour    2023-01-02 13         → 2023010213
//! Minute  2023-01-02 13:45      → 202301021345
//! Second  2023-01-02 13:45:30   → 20230102134530
//! ```

use super::error::DurationError;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Downsampling granularity of a duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Step {
    Day,
    Hour,
    Minute,
    Second,
}

impl Step {
    /// Input format accepted by [`Duration::parse`] for this step
    pub fn input_format(&self) -> &'static str {
        match self {
            Self::Day => "%Y-%m-%d",
            Self::Hour => "%Y-%m-%d %H",
            Self::Minute => "%Y-%m-%d %H%M",
            Self::Second => "%Y-%m-%d %H%M%S",
        }
    }

    /// Time bucket for a point in time at this granularity
    pub fn time_bucket(&self, at: NaiveDateTime) -> i64 {
        let day = at.year() as i64 * 10_000 + at.month() as i64 * 100 + at.day() as i64;
        match self {
            Self::Day => day,
            Self::Hour => day * 100 + at.hour() as i64,
            Self::Minute => (day * 100 + at.hour() as i64) * 100 + at.minute() as i64,
            Self::Second => {
                ((day * 100 + at.hour() as i64) * 100 + at.minute() as i64) * 100
                    + at.second() as i64
            }
        }
    }

    fn parse_point(&self, s: &str) -> Result<NaiveDateTime, DurationError> {
        let s = s.trim();
        let parsed = match self {
            // chrono needs hour and minute fields to build a datetime
            Self::Day => NaiveDateTime::parse_from_str(&format!("{} 0000", s), "%Y-%m-%d %H%M"),
            Self::Hour => NaiveDateTime::parse_from_str(&format!("{}00", s), "%Y-%m-%d %H%M"),
            Self::Minute | Self::Second => NaiveDateTime::parse_from_str(s, self.input_format()),
        };

        parsed.map_err(|e| DurationError::InvalidTime {
            input: s.to_string(),
            step: *self,
            reason: e.to_string(),
        })
    }
}

impl FromStr for Step {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "hour" => Ok(Self::Hour),
            "minute" => Ok(Self::Minute),
            "second" => Ok(Self::Second),
            other => Err(DurationError::InvalidStep(other.to_string())),
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day => write!(f, "DAY"),
            Self::Hour => write!(f, "HOUR"),
            Self::Minute => write!(f, "MINUTE"),
            Self::Second => write!(f, "SECOND"),
        }
    }
}

/// Closed time window of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub step: Step,
}

impl Duration {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, step: Step) -> Self {
        Self { start, end, step }
    }

    /// Parse start and end in the step's input format
    pub fn parse(start: &str, end: &str, step: Step) -> Result<Self, DurationError> {
        Ok(Self {
            start: step.parse_point(start)?,
            end: step.parse_point(end)?,
            step,
        })
    }

    pub fn start_time_bucket(&self) -> i64 {
        self.step.time_bucket(self.start)
    }

    pub fn end_time_bucket(&self) -> i64 {
        self.step.time_bucket(self.end)
    }
}
