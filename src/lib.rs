//! License expiry sync - derives expiration timestamps for sold licenses and
//! propagates them to the tier documents and the Redis cache.
//!
//! # Features
//!
//! - `scheduler` - Run the batch on a cron schedule (`jobs::SyncScheduler`)
//!   instead of once per invocation.
//!
//! # Stores
//!
//! - `<products.dir>/<tier>.json` - one JSON object per tier, license key to
//!   product record. Gets `expiresAt` / `expiresDate`.
//! - `<tier>_products:<key>` - cache mirror of the tier records. Gets
//!   `expiresAt` / `expiresDate`.
//! - `client_keys:<key>` - issued client keys. Gets `expires_at` /
//!   `expires_date`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use expiry_sync::config::SyncConfig;
//! use expiry_sync::jobs::ExpirySync;
//! use expiry_sync::store::MemoryStore;
//!
//! let sync = ExpirySync::new(SyncConfig::default(), Arc::new(MemoryStore::new()))?;
//! let report = sync.run_once().await;
//! ```

pub mod config;
pub mod errors;
pub mod jobs;
pub mod logging;
pub mod record;
pub mod store;
pub mod tiers;
pub mod time;
