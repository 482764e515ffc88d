//! Product tiers and their retention windows.
//!
//! A tier (`trial`, `medium`, `high`, `supreme`) owns one JSON document on disk,
//! one cache namespace (`<tier>_products:*`) and a retention window: the number
//! of days between a sale and the moment the license expires.
//!
//! # Configuration
//!
//! ```toml
//! [tiers]
//! order = ["trial", "medium", "high", "supreme"]
//!
//! [tiers.retention_days]
//! trial = 1
//! medium = 30
//! ```
//!
//! A tier that has no `retention_days` entry falls back to
//! [`DEFAULT_RETENTION_DAYS`] (or `tiers.default_retention_days`).

use std::collections::HashMap;

use chrono::Duration;

use crate::config::TiersConfig;
use crate::errors::{SyncError, SyncResult};

/// Retention window used when a tier has no explicit entry.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// A tier with its name and resolved retention window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    /// The tier name (e.g., "trial", "medium")
    pub name: String,
    /// Days added to the sale instant
    pub retention_days: u32,
}

impl Tier {
    /// The retention window as a duration.
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }

    /// Namespace of this tier's mirror records, `<tier>_products:`.
    pub fn cache_prefix(&self) -> String {
        format!("{}_products:", self.name)
    }

    /// Cache key pattern for this tier's mirror records.
    pub fn cache_pattern(&self) -> String {
        format!("{}*", self.cache_prefix())
    }

    /// File name of the tier document.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.name)
    }
}

/// Lookup table from tier name to retention window.
#[derive(Debug, Clone)]
pub struct RetentionTable {
    order: Vec<String>,
    days: HashMap<String, u32>,
    default_days: u32,
}

impl RetentionTable {
    pub fn from_config(config: &TiersConfig) -> Self {
        Self {
            order: config.order.clone(),
            days: config.retention_days.clone(),
            default_days: config.default_retention_days,
        }
    }

    /// Days for `tier_name`, or the default window when the tier is unknown.
    pub fn days_for(&self, tier_name: &str) -> u32 {
        self.days
            .get(tier_name)
            .copied()
            .unwrap_or(self.default_days)
    }

    /// Whether `tier_name` has an explicit retention entry.
    pub fn is_known(&self, tier_name: &str) -> bool {
        self.days.contains_key(tier_name)
    }

    pub fn tier(&self, tier_name: &str) -> Tier {
        Tier {
            name: tier_name.to_string(),
            retention_days: self.days_for(tier_name),
        }
    }

    /// All tiers the driver processes, in configured order.
    pub fn tiers(&self) -> Vec<Tier> {
        self.order.iter().map(|name| self.tier(name)).collect()
    }

    pub fn default_days(&self) -> u32 {
        self.default_days
    }
}

impl Default for RetentionTable {
    fn default() -> Self {
        Self::from_config(&TiersConfig::default())
    }
}

/// Reject tier names that would break cache key patterns or file names.
pub fn validate_tier_name(name: &str) -> SyncResult<()> {
    if name.is_empty() {
        return Err(SyncError::ConfigError(
            "tier names cannot be empty".to_string(),
        ));
    }
    if name
        .chars()
        .any(|c| matches!(c, ':' | '*' | '?' | '[' | ']' | '/' | '\\'))
    {
        return Err(SyncError::ConfigError(format!(
            "tier name '{name}' contains a reserved character"
        )));
    }
    Ok(())
}
