//! Logging setup and structured expiry events.
//!
//! Every run logs to stdout and, when `logging.file` is set, appends the same
//! lines to that file. Per-record changes are emitted through
//! [`log_expiry_event`] so they carry the event kind, the store being updated
//! and a truncated license key as span fields.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, info_span, warn, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::config::LoggingConfig;
use crate::record::key_prefix;

/// Separator line used around each run.
pub const BANNER: &str = "============================================================";

/// Kinds of per-record changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryEvent {
    /// Expiry fields were derived and written
    Computed,
    /// Expiry fields were nulled or removed
    Cleared,
    /// `soldAt` could not be parsed
    ParseFailed,
}

impl std::fmt::Display for ExpiryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExpiryEvent::Computed => "computed",
            ExpiryEvent::Cleared => "cleared",
            ExpiryEvent::ParseFailed => "parse_failed",
        };
        write!(f, "{}", s)
    }
}

/// Log a change to one record.
///
/// # Arguments
///
/// * `event` - What happened
/// * `scope` - The store being updated, e.g. `medium.json` or `client_keys`
/// * `key` - The license key; only a 20 character prefix is logged
/// * `details` - Optional free-form details
pub fn log_expiry_event(event: ExpiryEvent, scope: &str, key: &str, details: Option<&str>) {
    let span = info_span!(
        "expiry_event",
        event = %event,
        scope = %scope,
        key = %key_prefix(key),
    );
    let _enter = span.enter();

    match (event, details) {
        (ExpiryEvent::ParseFailed, Some(d)) => error!(reason = %d, "Failed to derive expiry"),
        (ExpiryEvent::ParseFailed, None) => error!("Failed to derive expiry"),
        (_, Some(d)) => info!(details = %d, "Expiry record updated"),
        (_, None) => info!("Expiry record updated"),
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber.
///
/// Does nothing if a subscriber is already installed (e.g. by a test harness).
pub fn init(config: &LoggingConfig) {
    let level = parse_level(&config.level);
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false);

    if config.file.is_empty() {
        let _ = builder.with_writer(std::io::stdout).try_init();
        return;
    }

    let path = Path::new(&config.file);
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            let writer = std::io::stdout.and(Arc::new(file));
            let _ = builder.with_writer(writer).try_init();
        }
        Err(e) => {
            let _ = builder.with_writer(std::io::stdout).try_init();
            warn!(
                "Could not open log file {}: {}; logging to stdout only",
                path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names() {
        assert_eq!(ExpiryEvent::Computed.to_string(), "computed");
        assert_eq!(ExpiryEvent::Cleared.to_string(), "cleared");
        assert_eq!(ExpiryEvent::ParseFailed.to_string(), "parse_failed");
    }

    #[test]
    fn level_parsing_defaults_to_info() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn logging_without_subscriber_does_not_panic() {
        log_expiry_event(ExpiryEvent::Computed, "medium.json", "sk-0123456789abcdefghijk", None);
        log_expiry_event(
            ExpiryEvent::ParseFailed,
            "client_keys",
            "abc",
            Some("soldAt 'x' is malformed"),
        );
    }
}
