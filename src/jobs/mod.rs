//! The expiry sync batch.
//!
//! One run walks every configured tier in order and, for each tier, updates the
//! tier document on disk and then the tier's cache mirror. After all tiers it
//! patches the client-key records once. Passes never abort the run: a failing
//! pass is logged, recorded in the [`RunReport`] and the next pass starts.
//!
//! # Usage
//!
//! ```rust,ignore
//! use expiry_sync::config::SyncConfig;
//! use expiry_sync::jobs::ExpirySync;
//!
//! let config = SyncConfig::init()?;
//! let sync = ExpirySync::from_config(config)?;
//! let report = sync.run_once().await;
//! println!("{} products updated", report.total_products());
//! ```

use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::errors::{Failure, SyncResult};
use crate::logging::BANNER;
use crate::record::EligibilityPolicy;
use crate::store::{HashStore, RedisStore};
use crate::tiers::{RetentionTable, Tier};
use crate::time::TimeResolver;

mod cache_products;
mod client_keys;
mod deadline;
mod product_files;
mod report;
#[cfg(feature = "scheduler")]
mod scheduler;

pub use cache_products::{update_cache_products, update_cache_products_within};
pub use client_keys::{
    build_product_index, update_client_keys, update_client_keys_within, IndexedProduct,
    ProductIndex, CLIENT_KEY_PREFIX,
};
pub use deadline::Deadline;
pub use product_files::{
    apply_to_document, load_tier_document, update_product_file, update_product_file_within,
    write_tier_document, TierDocument,
};
pub use report::{PassOutcome, RunReport, TierReport};
#[cfg(feature = "scheduler")]
pub use scheduler::SyncScheduler;

use deadline::timeout_failure;

/// How expiry fields are derived: the time resolver plus the eligibility policy.
#[derive(Debug, Clone, Default)]
pub struct ExpiryRules {
    pub resolver: TimeResolver,
    pub policy: EligibilityPolicy,
}

impl ExpiryRules {
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Ok(Self {
            resolver: TimeResolver::from_config(&config.time, &config.policy)?,
            policy: config.policy.eligibility,
        })
    }
}

/// Runs the batch against one tier directory and one cache store.
pub struct ExpirySync {
    config: SyncConfig,
    rules: ExpiryRules,
    retention: RetentionTable,
    store: Arc<dyn HashStore>,
}

impl ExpirySync {
    /// Create a driver over an explicit store.
    pub fn new(config: SyncConfig, store: Arc<dyn HashStore>) -> SyncResult<Self> {
        let rules = ExpiryRules::from_config(&config)?;
        let retention = RetentionTable::from_config(&config.tiers);
        Ok(Self {
            config,
            rules,
            retention,
            store,
        })
    }

    /// Create a driver talking to the Redis server named in `config.cache`.
    pub fn from_config(config: SyncConfig) -> SyncResult<Self> {
        let store = RedisStore::from_config(&config.cache)?;
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn rules(&self) -> &ExpiryRules {
        &self.rules
    }

    /// Tiers in processing order with their retention windows.
    pub fn tiers(&self) -> Vec<Tier> {
        self.retention.tiers()
    }

    /// Tier document pass for one tier, bounded by `job.run_timeout_secs`.
    pub async fn update_product_file(&self, tier: &Tier) -> PassOutcome {
        self.product_file_pass(tier, &self.deadline()).await
    }

    /// Cache mirror pass for one tier, bounded by `job.run_timeout_secs`.
    pub async fn update_cache_products(&self, tier: &Tier) -> PassOutcome {
        self.cache_pass(tier, &self.deadline()).await
    }

    /// Client-key cross-reference pass over all tiers, bounded by
    /// `job.run_timeout_secs`.
    pub async fn update_client_keys(&self) -> PassOutcome {
        self.client_key_pass(&self.deadline()).await
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.job.run_timeout())
    }

    async fn product_file_pass(&self, tier: &Tier, deadline: &Deadline) -> PassOutcome {
        let path = self.config.products.tier_path(&tier.name);
        product_files::update_product_file_within(&path, tier, &self.rules, deadline).await
    }

    async fn cache_pass(&self, tier: &Tier, deadline: &Deadline) -> PassOutcome {
        cache_products::update_cache_products_within(
            self.store.as_ref(),
            tier,
            &self.rules,
            deadline,
        )
        .await
    }

    async fn client_key_pass(&self, deadline: &Deadline) -> PassOutcome {
        let tiers = self.tiers();
        let index = match deadline
            .bound(build_product_index(&self.config.products, &tiers))
            .await
        {
            Some(Ok(index)) => index,
            Some(Err(e)) => {
                error!("Error updating client keys in Redis: {}", e);
                return PassOutcome::failed(Failure::from_error("client_keys", &e));
            }
            None => return PassOutcome::failed(timeout_failure("client_keys")),
        };
        client_keys::update_client_keys_within(
            self.store.as_ref(),
            &index,
            &self.retention,
            &self.rules,
            deadline,
        )
        .await
    }

    /// Run every pass once and log a summary.
    ///
    /// All passes share one deadline of `job.run_timeout_secs`. A pass cut
    /// short by it keeps the counts of what it finished and is recorded as
    /// timed out; passes not yet started are recorded as timed out with no
    /// work done.
    pub async fn run_once(&self) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("sync_run", run_id = %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: String) -> RunReport {
        let started_at = self.rules.resolver.now();
        let deadline = self.deadline();

        info!("{}", BANNER);
        info!("Starting expire date update task");
        info!(
            "Current time: {} (UTC{})",
            started_at.format("%Y-%m-%d %H:%M:%S"),
            self.rules.resolver.offset()
        );

        let mut tiers = Vec::new();
        for tier in self.tiers() {
            let file = self.product_file_pass(&tier, &deadline).await;
            let cache = self.cache_pass(&tier, &deadline).await;
            info!("Synced {} {} products to Redis", cache.updated, tier.name);

            tiers.push(TierReport {
                tier: tier.name.clone(),
                file,
                cache,
            });
        }

        let client_keys = self.client_key_pass(&deadline).await;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: self.rules.resolver.now(),
            tiers,
            client_keys,
        };

        for failure in report.failures() {
            warn!("Pass failed: {}", failure);
        }
        info!(
            "Task completed. Total updated: {} products, {} client keys",
            report.total_products(),
            report.total_client_keys()
        );
        info!("{}", BANNER);

        report
    }
}
