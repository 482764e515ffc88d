//! Tier document pass.
//!
//! Loads `<tier>.json`, derives `expiresAt`/`expiresDate` for every eligible
//! record and writes the whole document back. The write goes to a temporary
//! file in the same directory which is then renamed over the original, so a
//! crash mid-write never leaves a truncated document behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::errors::{Failure, SyncError, SyncResult};
use crate::logging::{log_expiry_event, ExpiryEvent};
use crate::record::{clear_expiry, set_expiry, Action, ProductRecord};
use crate::tiers::Tier;

use super::deadline::{timeout_failure, Deadline};
use super::report::PassOutcome;
use super::ExpiryRules;

/// A tier document: license key to product record, in file order.
pub type TierDocument = Map<String, Value>;

/// Read and decode a tier document.
pub async fn load_tier_document(path: &Path) -> SyncResult<TierDocument> {
    let bytes = tokio::fs::read(path).await?;
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::InvalidDocument(format!(
            "{} must hold a JSON object, found {}",
            path.display(),
            json_type_name(&other)
        ))),
    }
}

/// Atomically replace `path` with the pretty-printed document.
pub async fn write_tier_document(path: &Path, document: &TierDocument) -> SyncResult<()> {
    let bytes = serde_json::to_vec_pretty(document)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || persist_atomically(&path, &bytes))
        .await
        .map_err(|e| SyncError::Io(std::io::Error::other(e)))?
}

fn persist_atomically(path: &Path, bytes: &[u8]) -> SyncResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut tmp = NamedTempFile::new_in(&dir)?;
    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SyncError::Io(e.error))?;
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Apply the eligibility policy to every record of a loaded document.
///
/// Pure apart from logging; the caller decides whether to persist.
pub fn apply_to_document(
    document: &mut TierDocument,
    tier: &Tier,
    rules: &ExpiryRules,
    scope: &str,
) -> PassOutcome {
    let mut outcome = PassOutcome::default();

    for (key, value) in document.iter_mut() {
        let Some(fields) = value.as_object_mut() else {
            warn!("Skipping {} key {}: record is not an object", tier.name, key);
            continue;
        };

        let record = ProductRecord::new(fields);
        let status = record.status().map(str::to_string);
        let sold_at = record.sold_at().map(|s| s.as_text().to_string());

        match rules
            .policy
            .decide(status.as_deref(), sold_at.as_deref(), rules.resolver.sentinel())
        {
            Action::Compute(raw) => match rules.resolver.try_resolve(raw, tier.retention_days) {
                Ok(expiration) => {
                    set_expiry(fields, expiration.epoch_ms, &expiration.date);
                    outcome.updated += 1;
                    log_expiry_event(
                        ExpiryEvent::Computed,
                        scope,
                        key,
                        Some(&format!(
                            "soldAt={}, expiresDate={}",
                            raw.unwrap_or_default(),
                            expiration.date
                        )),
                    );
                }
                Err(e) => {
                    outcome.parse_errors += 1;
                    log_expiry_event(ExpiryEvent::ParseFailed, scope, key, Some(&e.to_string()));
                }
            },
            Action::Clear => {
                clear_expiry(fields);
                outcome.cleared += 1;
                debug!("Cleared expiry fields for unsold {} key", tier.name);
            }
            Action::Skip => {}
        }
    }

    outcome
}

/// Update the expiry fields of every eligible record in the document at `path`.
///
/// A missing or unreadable document fails the pass without touching the file.
pub async fn update_product_file(path: &Path, tier: &Tier, rules: &ExpiryRules) -> PassOutcome {
    update_product_file_within(path, tier, rules, &Deadline::none()).await
}

/// [`update_product_file`] bounded by `deadline`.
///
/// Only loading is bounded. Once the document is loaded the pass runs to the
/// end so a write already under way is neither abandoned nor left uncounted.
pub async fn update_product_file_within(
    path: &Path,
    tier: &Tier,
    rules: &ExpiryRules,
    deadline: &Deadline,
) -> PassOutcome {
    let scope = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| tier.file_name());

    let mut document = match deadline.bound(load_tier_document(path)).await {
        Some(Ok(document)) => document,
        Some(Err(e)) => {
            error!("Error updating file {}: {}", path.display(), e);
            return PassOutcome::failed(Failure::from_error(scope, &e));
        }
        None => return PassOutcome::failed(timeout_failure(scope)),
    };

    let outcome = apply_to_document(&mut document, tier, rules, &scope);

    if let Err(e) = write_tier_document(path, &document).await {
        error!("Error writing file {}: {}", path.display(), e);
        return PassOutcome::failed(Failure::from_error(scope, &e));
    }

    info!("Updated {} products in {}", outcome.updated, path.display());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_names() {
        assert_eq!(json_type_name(&json!([])), "an array");
        assert_eq!(json_type_name(&Value::Null), "null");
    }

    #[test]
    fn non_object_records_are_skipped() {
        let mut document = json!({
            "k1": "garbage",
            "k2": {"status": "sold", "soldAt": "2025-08-14 15:42:05"}
        })
        .as_object()
        .cloned()
        .unwrap();
        let rules = ExpiryRules::default();
        let tier = crate::tiers::RetentionTable::default().tier("medium");

        let outcome = apply_to_document(&mut document, &tier, &rules, "medium.json");
        assert_eq!(outcome.updated, 1);
        assert_eq!(document["k1"], json!("garbage"));
    }
}
