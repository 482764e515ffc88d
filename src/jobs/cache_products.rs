//! Tier cache mirror pass.
//!
//! Walks `<tier>_products:*` and writes `expiresAt`/`expiresDate` into every
//! sold record. The mirror is never cleared; unsold records are left alone.

use tracing::{error, info};

use crate::errors::{Failure, SyncResult};
use crate::logging::{log_expiry_event, ExpiryEvent};
use crate::record::{
    Action, FIELD_EXPIRES_AT, FIELD_EXPIRES_DATE, FIELD_SOLD_AT, FIELD_STATUS, STATUS_SOLD,
};
use crate::store::HashStore;
use crate::tiers::Tier;

use super::deadline::{timeout_failure, Deadline};
use super::report::PassOutcome;
use super::ExpiryRules;

/// Update every sold mirror record of `tier`.
///
/// The first cache error stops the pass; the counts accumulated until then are
/// kept and nothing is rolled back.
pub async fn update_cache_products(
    store: &dyn HashStore,
    tier: &Tier,
    rules: &ExpiryRules,
) -> PassOutcome {
    update_cache_products_within(store, tier, rules, &Deadline::none()).await
}

/// [`update_cache_products`] bounded by `deadline`. Records finished before
/// the deadline stay counted.
pub async fn update_cache_products_within(
    store: &dyn HashStore,
    tier: &Tier,
    rules: &ExpiryRules,
    deadline: &Deadline,
) -> PassOutcome {
    let pattern = tier.cache_pattern();

    let scanned = deadline.bound(store.scan_keys(&pattern)).await;
    let keys = match scanned {
        Some(Ok(keys)) => keys,
        Some(Err(e)) => {
            error!("Error updating Redis for {}: {}", tier.name, e);
            return PassOutcome::failed(Failure::from_error(pattern, &e));
        }
        None => return PassOutcome::failed(timeout_failure(pattern)),
    };

    let mut outcome = PassOutcome::default();
    for key in &keys {
        let updated = deadline
            .bound(update_mirror_record(store, key, tier, rules, &mut outcome))
            .await;
        match updated {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!("Error updating Redis for {} at {}: {}", tier.name, key, e);
                outcome.failure = Some(Failure::from_error(key.as_str(), &e));
                break;
            }
            None => {
                outcome.failure = Some(timeout_failure(pattern.as_str()));
                break;
            }
        }
    }

    info!("Updated {} {} products in Redis", outcome.updated, tier.name);
    outcome
}

async fn update_mirror_record(
    store: &dyn HashStore,
    key: &str,
    tier: &Tier,
    rules: &ExpiryRules,
    outcome: &mut PassOutcome,
) -> SyncResult<()> {
    let fields = store.hash_get_all(key).await?;
    if fields.is_empty() {
        return Ok(());
    }

    let status = fields.get(FIELD_STATUS).map(String::as_str);
    if status != Some(STATUS_SOLD) {
        return Ok(());
    }
    let license_key = key.strip_prefix(&tier.cache_prefix()).unwrap_or(key);
    // Redis has no null; an empty soldAt means "not set".
    let sold_at = fields
        .get(FIELD_SOLD_AT)
        .map(String::as_str)
        .filter(|s| !s.is_empty());

    match rules.policy.decide(status, sold_at, rules.resolver.sentinel()) {
        Action::Compute(raw) => match rules.resolver.try_resolve(raw, tier.retention_days) {
            Ok(expiration) => {
                store
                    .hash_set(
                        key,
                        &[
                            (FIELD_EXPIRES_AT, expiration.epoch_ms.to_string()),
                            (FIELD_EXPIRES_DATE, expiration.date.clone()),
                        ],
                    )
                    .await?;
                outcome.updated += 1;
                log_expiry_event(
                    ExpiryEvent::Computed,
                    &pattern_scope(tier),
                    license_key,
                    Some(&format!("expiresDate={}", expiration.date)),
                );
            }
            Err(e) => {
                outcome.parse_errors += 1;
                log_expiry_event(
                    ExpiryEvent::ParseFailed,
                    &pattern_scope(tier),
                    license_key,
                    Some(&e.to_string()),
                );
            }
        },
        // The mirror keeps whatever it has for records the policy would clear.
        Action::Clear | Action::Skip => {}
    }

    Ok(())
}

fn pattern_scope(tier: &Tier) -> String {
    format!("{}_products", tier.name)
}
