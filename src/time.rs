//! Sale-time parsing and expiration arithmetic.
//!
//! `soldAt` values are civil timestamps in one fixed zone (UTC+8 by default,
//! no DST) written as `YYYY-MM-DD HH:MM:SS`. The expiration instant is the sale
//! instant plus the tier's retention window in whole days, reported both as
//! epoch milliseconds and as a civil string in the same zone.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::error;

use crate::config::{PolicyConfig, TimeConfig, DEFAULT_UTC_OFFSET_SECS};
use crate::errors::{SyncError, SyncResult, TimeError};

const SOLD_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn sold_at_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$").expect("soldAt pattern is valid")
    })
}

/// Separator between the date and time parts of a written `expiresDate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DateSeparator {
    /// `2025-09-13 15:42:05`
    #[default]
    #[serde(rename = "space", alias = " ")]
    Space,
    /// `2025-09-13T15:42:05`
    #[serde(rename = "T", alias = "t")]
    T,
}

impl DateSeparator {
    fn format(&self) -> &'static str {
        match self {
            DateSeparator::Space => "%Y-%m-%d %H:%M:%S",
            DateSeparator::T => "%Y-%m-%dT%H:%M:%S",
        }
    }
}

/// A derived expiration instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiration {
    /// The instant in the configured zone
    pub instant: DateTime<FixedOffset>,
    /// Milliseconds since the Unix epoch (`expiresAt`)
    pub epoch_ms: i64,
    /// Civil string in the configured zone (`expiresDate`)
    pub date: String,
}

/// Turns `soldAt` strings into expiration instants.
#[derive(Debug, Clone)]
pub struct TimeResolver {
    offset: FixedOffset,
    separator: DateSeparator,
    sentinel: String,
}

impl Default for TimeResolver {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).expect("UTC+8 is in range"),
            separator: DateSeparator::Space,
            sentinel: "NULL".to_string(),
        }
    }
}

impl TimeResolver {
    pub fn new(offset: FixedOffset, separator: DateSeparator, sentinel: impl Into<String>) -> Self {
        Self {
            offset,
            separator,
            sentinel: sentinel.into(),
        }
    }

    pub fn from_config(time: &TimeConfig, policy: &PolicyConfig) -> SyncResult<Self> {
        let offset = FixedOffset::east_opt(time.utc_offset_secs).ok_or_else(|| {
            SyncError::ConfigError(format!(
                "time.utc_offset_secs {} is out of range",
                time.utc_offset_secs
            ))
        })?;
        Ok(Self::new(offset, time.date_separator, policy.sold_at_sentinel.clone()))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Whether `value` is the "not set" sentinel.
    pub fn is_sentinel(&self, value: &str) -> bool {
        value == self.sentinel
    }

    /// Parse a `soldAt` value as civil time in the configured zone.
    pub fn parse_sold_at(&self, raw: Option<&str>) -> Result<DateTime<FixedOffset>, TimeError> {
        let value = raw.ok_or(TimeError::Missing)?;
        if self.is_sentinel(value) {
            return Err(TimeError::Sentinel);
        }
        if !sold_at_regex().is_match(value) {
            return Err(TimeError::Malformed {
                value: value.to_string(),
                reason: "does not match YYYY-MM-DD HH:MM:SS".to_string(),
            });
        }

        let naive = NaiveDateTime::parse_from_str(value, SOLD_AT_FORMAT).map_err(|e| {
            TimeError::Malformed {
                value: value.to_string(),
                reason: e.to_string(),
            }
        })?;

        self.offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| TimeError::Malformed {
                value: value.to_string(),
                reason: "not representable in the configured zone".to_string(),
            })
    }

    /// Expiration for a sale instant and a retention window in days.
    ///
    /// Fails with [`TimeError::OutOfRange`] when the result is past the
    /// representable calendar.
    pub fn expiration_from(
        &self,
        sold_at: DateTime<FixedOffset>,
        retention_days: u32,
    ) -> Result<Expiration, TimeError> {
        let instant = Duration::try_days(i64::from(retention_days))
            .and_then(|window| sold_at.checked_add_signed(window))
            .ok_or(TimeError::OutOfRange { retention_days })?
            .with_timezone(&self.offset);
        Ok(Expiration {
            instant,
            epoch_ms: instant.timestamp_millis(),
            date: self.format_civil(&instant),
        })
    }

    /// Parse and add the window, reporting why it failed.
    pub fn try_resolve(
        &self,
        raw: Option<&str>,
        retention_days: u32,
    ) -> Result<Expiration, TimeError> {
        let sold_at = self.parse_sold_at(raw)?;
        self.expiration_from(sold_at, retention_days)
    }

    /// Parse and add the window. Failures are logged and yield `None`.
    pub fn resolve(&self, raw: Option<&str>, retention_days: u32) -> Option<Expiration> {
        match self.try_resolve(raw, retention_days) {
            Ok(expiration) => Some(expiration),
            Err(e) => {
                error!("Failed to parse soldAt: {:?}, error: {}", raw, e);
                None
            }
        }
    }

    /// Format an instant as civil time in the configured zone.
    pub fn format_civil<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> String {
        instant
            .with_timezone(&self.offset)
            .format(self.separator.format())
            .to_string()
    }

    /// Parse a written `expiresDate` back into an instant. Both separators are accepted.
    pub fn parse_expires_date(&self, value: &str) -> Option<DateTime<FixedOffset>> {
        let naive = NaiveDateTime::parse_from_str(value, DateSeparator::Space.format())
            .or_else(|_| NaiveDateTime::parse_from_str(value, DateSeparator::T.format()))
            .ok()?;
        self.offset.from_local_datetime(&naive).single()
    }

    /// Current time in the configured zone.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}
