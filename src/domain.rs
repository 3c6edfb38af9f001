use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// Calendar-day partition key shared by every archived category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// `None` when the result falls outside the supported calendar.
    pub fn days_before(&self, days: u32) -> Option<Self> {
        self.0.checked_sub_days(Days::new(u64::from(days))).map(Self)
    }

    pub fn pred(&self) -> Option<Self> {
        self.days_before(1)
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DateKey {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        // chrono accepts unpadded fields; the archive layout does not.
        if trimmed.len() != 10 {
            return Err(ArchiveError::InvalidDate(value.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Self)
            .map_err(|_| ArchiveError::InvalidDate(value.to_string()))
    }
}

impl TryFrom<String> for DateKey {
    type Error = ArchiveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DateKey> for String {
    fn from(key: DateKey) -> Self {
        key.to_string()
    }
}

/// Inclusive range of calendar days passed to the WHOOP collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateKey,
    pub end: DateKey,
}

impl DateRange {
    pub fn single(date: DateKey) -> Self {
        Self {
            start: date,
            end: date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    HeartRate,
    Sleep,
    Cycle,
    Activity,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::HeartRate,
        Category::Sleep,
        Category::Cycle,
        Category::Activity,
    ];

    /// Directory name of the category partition under the data root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::HeartRate => "heartRate",
            Category::Sleep => "sleep",
            Category::Cycle => "cycles",
            Category::Activity => "activities",
        }
    }

    /// Filename prefix, joined to the date with `_`.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Category::HeartRate => "heartRate",
            Category::Sleep => "sleep",
            Category::Cycle => "cycle",
            Category::Activity => "activity",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::HeartRate => write!(f, "heart_rate"),
            Category::Sleep => write!(f, "sleep"),
            Category::Cycle => write!(f, "cycle"),
            Category::Activity => write!(f, "activity"),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticated handle to the WHOOP API, valid for a single run.
#[derive(Clone)]
pub struct Session {
    pub access_token: String,
    pub user_id: u64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
