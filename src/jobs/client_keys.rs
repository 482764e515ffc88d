//! Client-key cross-reference pass.
//!
//! `client_keys:<key>` records belong to the key-issuance service. This pass
//! only patches their `expires_at`/`expires_date` fields, using the product
//! record with the same license key from whichever tier document holds it.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::config::ProductsConfig;
use crate::errors::{Failure, SyncResult};
use crate::logging::{log_expiry_event, ExpiryEvent};
use crate::record::{Action, ProductRecord, FIELD_CLIENT_EXPIRES_AT, FIELD_CLIENT_EXPIRES_DATE};
use crate::store::HashStore;
use crate::tiers::{RetentionTable, Tier};

use super::deadline::{timeout_failure, Deadline};
use super::product_files::{load_tier_document, TierDocument};
use super::report::PassOutcome;
use super::ExpiryRules;

/// Cache namespace of client-key records.
pub const CLIENT_KEY_PREFIX: &str = "client_keys:";

const CLIENT_KEY_PATTERN: &str = "client_keys:*";
const CLIENT_KEY_SCOPE: &str = "client_keys";

/// What the cross-reference needs to know about one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedProduct {
    /// Tier whose document holds the record
    pub tier: String,
    pub status: Option<String>,
    pub sold_at: Option<String>,
}

/// Merged license key lookup over all tier documents.
#[derive(Debug, Clone, Default)]
pub struct ProductIndex {
    entries: HashMap<String, IndexedProduct>,
}

impl ProductIndex {
    pub fn get(&self, license_key: &str) -> Option<&IndexedProduct> {
        self.entries.get(license_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every record of one tier document. A key already indexed from an
    /// earlier tier is replaced.
    pub fn extend_from_document(&mut self, tier: &str, document: &TierDocument) {
        for (key, value) in document {
            let Some(fields) = value.as_object() else {
                continue;
            };
            let record = ProductRecord::new(fields);
            let product = IndexedProduct {
                tier: tier.to_string(),
                status: record.status().map(str::to_string),
                sold_at: record.sold_at().map(|s| s.as_text().to_string()),
            };
            if let Some(previous) = self.entries.insert(key.clone(), product) {
                warn!(
                    "License key found in both {} and {}; using {}",
                    previous.tier, tier, tier
                );
            }
        }
    }
}

/// Load every tier document into one lookup. Tiers without a document are
/// skipped; a document that exists but cannot be read fails the whole build.
pub async fn build_product_index(
    products: &ProductsConfig,
    tiers: &[Tier],
) -> SyncResult<ProductIndex> {
    let mut index = ProductIndex::default();
    for tier in tiers {
        let path = products.tier_path(&tier.name);
        if !document_exists(&path).await {
            debug!("No document for tier {} at {}", tier.name, path.display());
            continue;
        }
        let document = load_tier_document(&path).await?;
        index.extend_from_document(&tier.name, &document);
    }
    Ok(index)
}

async fn document_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Patch the expiry fields of every `client_keys:*` record found in `index`.
///
/// Keys with no product record are left untouched and not counted.
pub async fn update_client_keys(
    store: &dyn HashStore,
    index: &ProductIndex,
    retention: &RetentionTable,
    rules: &ExpiryRules,
) -> PassOutcome {
    update_client_keys_within(store, index, retention, rules, &Deadline::none()).await
}

/// [`update_client_keys`] bounded by `deadline`. Keys patched before the
/// deadline stay counted.
pub async fn update_client_keys_within(
    store: &dyn HashStore,
    index: &ProductIndex,
    retention: &RetentionTable,
    rules: &ExpiryRules,
    deadline: &Deadline,
) -> PassOutcome {
    let keys = match deadline.bound(store.scan_keys(CLIENT_KEY_PATTERN)).await {
        Some(Ok(keys)) => keys,
        Some(Err(e)) => {
            error!("Error updating client keys in Redis: {}", e);
            return PassOutcome::failed(Failure::from_error(CLIENT_KEY_PATTERN, &e));
        }
        None => return PassOutcome::failed(timeout_failure(CLIENT_KEY_PATTERN)),
    };

    let mut outcome = PassOutcome::default();
    for redis_key in &keys {
        let license_key = redis_key
            .strip_prefix(CLIENT_KEY_PREFIX)
            .unwrap_or(redis_key.as_str());

        let Some(product) = index.get(license_key) else {
            continue;
        };

        let patched = deadline
            .bound(patch_client_key(
                store,
                redis_key,
                license_key,
                product,
                retention,
                rules,
                &mut outcome,
            ))
            .await;
        match patched {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!("Error updating client key {}: {}", redis_key, e);
                outcome.failure = Some(Failure::from_error(redis_key.as_str(), &e));
                break;
            }
            None => {
                outcome.failure = Some(timeout_failure(CLIENT_KEY_PATTERN));
                break;
            }
        }
    }

    info!("Updated {} client keys in Redis", outcome.updated);
    outcome
}

async fn patch_client_key(
    store: &dyn HashStore,
    redis_key: &str,
    license_key: &str,
    product: &IndexedProduct,
    retention: &RetentionTable,
    rules: &ExpiryRules,
    outcome: &mut PassOutcome,
) -> SyncResult<()> {
    if !retention.is_known(&product.tier) {
        warn!(
            "Tier {} has no retention window; using default of {} days",
            product.tier,
            retention.default_days()
        );
    }
    let retention_days = retention.days_for(&product.tier);

    match rules.policy.decide(
        product.status.as_deref(),
        product.sold_at.as_deref(),
        rules.resolver.sentinel(),
    ) {
        Action::Compute(raw) => match rules.resolver.try_resolve(raw, retention_days) {
            Ok(expiration) => {
                store
                    .hash_set(
                        redis_key,
                        &[
                            (FIELD_CLIENT_EXPIRES_AT, expiration.epoch_ms.to_string()),
                            (FIELD_CLIENT_EXPIRES_DATE, expiration.date.clone()),
                        ],
                    )
                    .await?;
                outcome.updated += 1;
                log_expiry_event(
                    ExpiryEvent::Computed,
                    CLIENT_KEY_SCOPE,
                    license_key,
                    Some(&format!(
                        "expires_at={}, expires_date={}",
                        expiration.epoch_ms, expiration.date
                    )),
                );
            }
            Err(e) => {
                outcome.parse_errors += 1;
                log_expiry_event(
                    ExpiryEvent::ParseFailed,
                    CLIENT_KEY_SCOPE,
                    license_key,
                    Some(&e.to_string()),
                );
            }
        },
        Action::Clear => {
            store
                .hash_delete(redis_key, &[FIELD_CLIENT_EXPIRES_AT, FIELD_CLIENT_EXPIRES_DATE])
                .await?;
            outcome.cleared += 1;
            log_expiry_event(
                ExpiryEvent::Cleared,
                CLIENT_KEY_SCOPE,
                license_key,
                Some("unsold key"),
            );
        }
        Action::Skip => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_tier_replaces_earlier_entry() {
        let mut index = ProductIndex::default();
        let medium = json!({"k": {"status": "unsold", "soldAt": null}});
        let high = json!({"k": {"status": "sold", "soldAt": "2025-08-14 15:42:05"}});
        index.extend_from_document("medium", medium.as_object().unwrap());
        index.extend_from_document("high", high.as_object().unwrap());

        let product = index.get("k").unwrap();
        assert_eq!(product.tier, "high");
        assert_eq!(product.status.as_deref(), Some("sold"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn index_skips_non_object_records() {
        let mut index = ProductIndex::default();
        let doc = json!({"a": 1, "b": {"status": "sold"}});
        index.extend_from_document("trial", doc.as_object().unwrap());
        assert!(index.get("a").is_none());
        assert_eq!(index.get("b").unwrap().sold_at, None);
    }
}
