use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TARGET_LABEL: &str = "Event";
pub const DEFAULT_TARGET_DATE: TargetDate = TargetDate { month: 12, day: 24 };
pub const TIMEZONE_MIN: i32 = -12;
pub const TIMEZONE_MAX: i32 = 14;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid target date `{0}`; expected MM-DD")]
    InvalidTargetDate(String),
}

/// A month/day pair without a year. The year is resolved at each countdown
/// recomputation so the target always refers to the nearest non-past
/// occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetDate {
    pub month: u32,
    pub day: u32,
}

impl TargetDate {
    /// Parses the `MM-DD` form the persisted record and the web form use.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidTargetDate(value.to_string());

        let (month, day) = value.split_once('-').ok_or_else(invalid)?;
        let month = month.trim().parse::<u32>().map_err(|_| invalid())?;
        let day = day.trim().parse::<u32>().map_err(|_| invalid())?;

        let date = Self { month, day };
        if !date.is_valid() {
            return Err(invalid());
        }
        Ok(date)
    }

    /// Month in 1..=12 and day valid for that month. Feb 29 is accepted; it
    /// is clamped against non-leap resolved years by the countdown.
    pub fn is_valid(self) -> bool {
        (1..=12).contains(&self.month) && self.day >= 1 && self.day <= max_day(self.month)
    }
}

impl fmt::Display for TargetDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl TryFrom<String> for TargetDate {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TargetDate> for String {
    fn from(date: TargetDate) -> Self {
        date.to_string()
    }
}

fn max_day(month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => 29,
        _ => 0,
    }
}

/// The single persisted record. Replaced wholesale by a provisioning
/// submission, never field-patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    pub ssid: String,
    pub password: String,
    #[serde(default)]
    pub timezone: i32,
    #[serde(default = "default_target_date")]
    pub target_date: TargetDate,
    #[serde(default = "default_target_label")]
    pub target_label: String,
}

fn default_target_date() -> TargetDate {
    DEFAULT_TARGET_DATE
}

fn default_target_label() -> String {
    DEFAULT_TARGET_LABEL.to_string()
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            timezone: 0,
            target_date: DEFAULT_TARGET_DATE,
            target_label: default_target_label(),
        }
    }
}

impl Configuration {
    pub fn sanitize(&mut self) {
        self.timezone = self.timezone.clamp(TIMEZONE_MIN, TIMEZONE_MAX);

        if !self.target_date.is_valid() {
            self.target_date = DEFAULT_TARGET_DATE;
        }

        if self.target_label.trim().is_empty() {
            self.target_label = default_target_label();
        }
    }

    /// Normal operation needs something to connect to; an empty SSID routes
    /// the boot back into provisioning.
    pub fn has_station_credentials(&self) -> bool {
        !self.ssid.trim().is_empty()
    }
}
