//! Structured results of a run.

use chrono::{DateTime, FixedOffset};

use crate::errors::Failure;

/// Result of one pass over one store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Records whose expiry fields were computed and written this run
    pub updated: u32,
    /// Records whose expiry fields were nulled or removed
    pub cleared: u32,
    /// Eligible records whose `soldAt` could not be parsed
    pub parse_errors: u32,
    /// Set when the pass stopped early; counts above are what was done before
    pub failure: Option<Failure>,
}

impl PassOutcome {
    pub fn failed(failure: Failure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

/// Both passes for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierReport {
    pub tier: String,
    /// Tier document pass
    pub file: PassOutcome,
    /// Tier cache mirror pass
    pub cache: PassOutcome,
}

/// Everything one run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<FixedOffset>,
    pub finished_at: DateTime<FixedOffset>,
    pub tiers: Vec<TierReport>,
    pub client_keys: PassOutcome,
}

impl RunReport {
    /// Products updated across all tier documents.
    pub fn total_products(&self) -> u32 {
        self.tiers.iter().map(|t| t.file.updated).sum()
    }

    /// Mirror records updated across all tiers.
    pub fn total_cache_products(&self) -> u32 {
        self.tiers.iter().map(|t| t.cache.updated).sum()
    }

    pub fn total_client_keys(&self) -> u32 {
        self.client_keys.updated
    }

    pub fn tier(&self, name: &str) -> Option<&TierReport> {
        self.tiers.iter().find(|t| t.tier == name)
    }

    /// Every failure recorded during the run, in execution order.
    pub fn failures(&self) -> Vec<&Failure> {
        self.tiers
            .iter()
            .flat_map(|t| [t.file.failure.as_ref(), t.cache.failure.as_ref()])
            .chain(std::iter::once(self.client_keys.failure.as_ref()))
            .flatten()
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use chrono::Utc;

    fn outcome(updated: u32) -> PassOutcome {
        PassOutcome {
            updated,
            ..PassOutcome::default()
        }
    }

    #[test]
    fn totals_and_failures() {
        let now = Utc::now().fixed_offset();
        let report = RunReport {
            run_id: "r".to_string(),
            started_at: now,
            finished_at: now,
            tiers: vec![
                TierReport {
                    tier: "medium".to_string(),
                    file: outcome(3),
                    cache: outcome(2),
                },
                TierReport {
                    tier: "high".to_string(),
                    file: PassOutcome::failed(Failure::new(
                        FailureKind::Io,
                        "high.json",
                        "missing",
                    )),
                    cache: outcome(1),
                },
            ],
            client_keys: outcome(4),
        };

        assert_eq!(report.total_products(), 3);
        assert_eq!(report.total_cache_products(), 3);
        assert_eq!(report.total_client_keys(), 4);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].scope, "high.json");
        assert!(!report.is_clean());
        assert!(report.tier("medium").unwrap().file.is_ok());
        assert!(report.tier("trial").is_none());
    }
}
