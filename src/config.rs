//! Configuration system for the expiry sync job.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file (or the file named by `EXPIRY_SYNC_CONFIG`)
//! 3. Default values (lowest priority)
//!
//! The defaults reproduce the constants the job has always run with, so an
//! empty environment behaves exactly like the historical deployment.
//!
//! # Environment Variables
//!
//! - `EXPIRY_SYNC_CONFIG` - Path of the config file (without extension is fine)
//! - `EXPIRY_SYNC_PRODUCTS_DIR` - Directory holding `<tier>.json` documents
//! - `EXPIRY_SYNC_CACHE_HOST` - Redis host
//! - `EXPIRY_SYNC_CACHE_PORT` - Redis port
//! - `EXPIRY_SYNC_CACHE_DB` - Redis database index
//! - `EXPIRY_SYNC_UTC_OFFSET_SECS` - Fixed civil time offset, seconds east of UTC
//! - `EXPIRY_SYNC_DATE_SEPARATOR` - `space` or `T`
//! - `EXPIRY_SYNC_POLICY` - `null_preserving` or `sentinel_aware`
//! - `EXPIRY_SYNC_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `EXPIRY_SYNC_LOG_FILE` - Log file path (empty disables the file sink)
//! - `EXPIRY_SYNC_RUN_TIMEOUT_SECS` - Whole-run timeout in seconds
//! - `EXPIRY_SYNC_SCHEDULE` - Cron expression (requires the `scheduler` feature)

use config::Config;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{SyncError, SyncResult};
use crate::record::EligibilityPolicy;
use crate::time::DateSeparator;

const DEFAULT_PRODUCTS_DIR: &str = "/home/leon/claude-route-ssl/claude-route-ssl/product";
const DEFAULT_LOG_FILE: &str = "/home/leon/claude-route-ssl/claude-route-ssl/logs/expire-update.log";

/// Beijing time, UTC+8.
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Longest accepted retention window, one hundred years.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Longest accepted run timeout, one week.
pub const MAX_RUN_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tier document location
    pub products: ProductsConfig,
    /// Cache server connection
    pub cache: CacheConfig,
    /// Civil time handling
    pub time: TimeConfig,
    /// Which records get expiry fields
    pub policy: PolicyConfig,
    /// Tier order and retention windows
    pub tiers: TiersConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Run-level settings
    pub job: JobConfig,
}

/// Where the per-tier JSON documents live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProductsConfig {
    pub dir: PathBuf,
}

impl Default for ProductsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_PRODUCTS_DIR),
        }
    }
}

impl ProductsConfig {
    /// Path of the document for `tier`, i.e. `<dir>/<tier>.json`.
    pub fn tier_path(&self, tier: &str) -> PathBuf {
        self.dir.join(format!("{tier}.json"))
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    /// Database index
    pub db: i64,
    /// `COUNT` hint passed to each `SCAN` call
    pub scan_count: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6380,
            db: 0,
            scan_count: 500,
        }
    }
}

impl CacheConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Civil time configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Fixed offset east of UTC in seconds. No DST is applied.
    pub utc_offset_secs: i32,
    /// Separator between date and time in written `expiresDate` values
    pub date_separator: DateSeparator,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            utc_offset_secs: DEFAULT_UTC_OFFSET_SECS,
            date_separator: DateSeparator::Space,
        }
    }
}

/// Eligibility policy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub eligibility: EligibilityPolicy,
    /// Literal stored in `soldAt` for products that were never sold
    pub sold_at_sentinel: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            eligibility: EligibilityPolicy::NullPreserving,
            sold_at_sentinel: "NULL".to_string(),
        }
    }
}

/// Tier configuration.
///
/// ```toml
/// [tiers]
/// order = ["trial", "medium", "high", "supreme"]
/// default_retention_days = 30
///
/// [tiers.retention_days]
/// trial = 1
/// medium = 30
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    /// Tiers processed by the driver, in order
    pub order: Vec<String>,
    /// Retention window per tier, in days
    pub retention_days: HashMap<String, u32>,
    /// Window used for a tier with no entry in `retention_days`
    pub default_retention_days: u32,
}

impl Default for TiersConfig {
    fn default() -> Self {
        let order: Vec<String> = ["trial", "medium", "high", "supreme"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let retention_days = order
            .iter()
            .map(|t| (t.clone(), if t == "trial" { 1 } else { 30 }))
            .collect();
        Self {
            order,
            retention_days,
            default_retention_days: crate::tiers::DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// File the log is appended to, in addition to stdout. Empty disables it.
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

/// Run-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Abort the whole run after this many seconds
    pub run_timeout_secs: u64,
    /// Cron expression for daemon mode (requires the `scheduler` feature)
    pub schedule: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: 600,
            schedule: None,
        }
    }
}

impl JobConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl SyncConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    pub fn load() -> SyncResult<Self> {
        let defaults = SyncConfig::default();
        let config_file = env::var("EXPIRY_SYNC_CONFIG").unwrap_or_else(|_| "config".to_string());

        let mut builder = Config::builder()
            // Start with defaults
            .set_default("products.dir", defaults.products.dir.to_string_lossy().to_string())?
            .set_default("cache.host", defaults.cache.host.clone())?
            .set_default("cache.port", i64::from(defaults.cache.port))?
            .set_default("cache.db", defaults.cache.db)?
            .set_default("cache.scan_count", i64::from(defaults.cache.scan_count))?
            .set_default("time.utc_offset_secs", i64::from(defaults.time.utc_offset_secs))?
            .set_default("time.date_separator", "space")?
            .set_default("policy.eligibility", "null_preserving")?
            .set_default("policy.sold_at_sentinel", defaults.policy.sold_at_sentinel.clone())?
            .set_default("tiers.order", defaults.tiers.order.clone())?
            .set_default(
                "tiers.default_retention_days",
                i64::from(defaults.tiers.default_retention_days),
            )?
            .set_default("logging.level", defaults.logging.level.clone())?
            .set_default("logging.file", defaults.logging.file.clone())?
            .set_default("job.run_timeout_secs", defaults.job.run_timeout_secs as i64)?;

        for (tier, days) in &defaults.tiers.retention_days {
            builder = builder.set_default(format!("tiers.retention_days.{tier}"), i64::from(*days))?;
        }

        let builder = builder
            // Load from config.toml (optional)
            .add_source(config::File::with_name(&config_file).required(false))
            // Override with environment variables
            .set_override_option("products.dir", env::var("EXPIRY_SYNC_PRODUCTS_DIR").ok())?
            .set_override_option("cache.host", env::var("EXPIRY_SYNC_CACHE_HOST").ok())?
            .set_override_option("cache.port", env_parsed::<i64>("EXPIRY_SYNC_CACHE_PORT"))?
            .set_override_option("cache.db", env_parsed::<i64>("EXPIRY_SYNC_CACHE_DB"))?
            .set_override_option(
                "time.utc_offset_secs",
                env_parsed::<i64>("EXPIRY_SYNC_UTC_OFFSET_SECS"),
            )?
            .set_override_option(
                "time.date_separator",
                env::var("EXPIRY_SYNC_DATE_SEPARATOR").ok(),
            )?
            .set_override_option("policy.eligibility", env::var("EXPIRY_SYNC_POLICY").ok())?
            .set_override_option("logging.level", env::var("EXPIRY_SYNC_LOG_LEVEL").ok())?
            .set_override_option("logging.file", env::var("EXPIRY_SYNC_LOG_FILE").ok())?
            .set_override_option(
                "job.run_timeout_secs",
                env_parsed::<i64>("EXPIRY_SYNC_RUN_TIMEOUT_SECS"),
            )?
            .set_override_option("job.schedule", env::var("EXPIRY_SYNC_SCHEDULE").ok())?;

        let settings = builder
            .build()
            .map_err(|e| SyncError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| SyncError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Load and validate in one step.
    pub fn init() -> SyncResult<Self> {
        let config = Self::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.cache.port == 0 {
            return Err(SyncError::ConfigError(
                "cache.port must be greater than 0".to_string(),
            ));
        }
        if self.cache.host.is_empty() {
            return Err(SyncError::ConfigError(
                "cache.host cannot be empty".to_string(),
            ));
        }

        if self.time.utc_offset_secs.abs() >= 86_400 {
            return Err(SyncError::ConfigError(format!(
                "time.utc_offset_secs must be within one day, got {}",
                self.time.utc_offset_secs
            )));
        }

        if self.tiers.order.is_empty() {
            return Err(SyncError::ConfigError(
                "tiers.order must name at least one tier".to_string(),
            ));
        }
        for tier in &self.tiers.order {
            crate::tiers::validate_tier_name(tier)?;
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.tiers.default_retention_days) {
            return Err(SyncError::ConfigError(format!(
                "tiers.default_retention_days must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }
        if let Some((tier, _)) = self
            .tiers
            .retention_days
            .iter()
            .find(|(_, d)| !(1..=MAX_RETENTION_DAYS).contains(*d))
        {
            return Err(SyncError::ConfigError(format!(
                "tiers.retention_days.{tier} must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }

        // Validate log level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(SyncError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        if !(1..=MAX_RUN_TIMEOUT_SECS).contains(&self.job.run_timeout_secs) {
            return Err(SyncError::ConfigError(format!(
                "job.run_timeout_secs must be between 1 and {MAX_RUN_TIMEOUT_SECS}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_historical_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.cache.port, 6380);
        assert_eq!(config.cache.url(), "redis://localhost:6380/0");
        assert_eq!(config.time.utc_offset_secs, 28_800);
        assert_eq!(config.policy.sold_at_sentinel, "NULL");
        assert_eq!(
            config.tiers.order,
            vec!["trial", "medium", "high", "supreme"]
        );
        assert_eq!(config.tiers.retention_days["trial"], 1);
        assert_eq!(config.tiers.retention_days["supreme"], 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tier_path_joins_directory() {
        let products = ProductsConfig {
            dir: PathBuf::from("/srv/product"),
        };
        assert_eq!(
            products.tier_path("high"),
            PathBuf::from("/srv/product/high.json")
        );
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = SyncConfig::default();
        config.cache.port = 0;
        assert!(matches!(config.validate(), Err(SyncError::ConfigError(_))));
    }

    #[test]
    fn rejects_bad_tier_name() {
        let mut config = SyncConfig::default();
        config.tiers.order.push("bad:tier".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_retention() {
        let mut config = SyncConfig::default();
        config.tiers.retention_days.insert("high".to_string(), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_retention() {
        let mut config = SyncConfig::default();
        config.tiers.retention_days.insert("medium".to_string(), 200_000_000);
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.tiers.default_retention_days = MAX_RETENTION_DAYS + 1;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.tiers.retention_days.insert("medium".to_string(), MAX_RETENTION_DAYS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_run_timeout() {
        let mut config = SyncConfig::default();
        config.job.run_timeout_secs = i64::MAX as u64;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = SyncConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
