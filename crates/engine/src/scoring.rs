//! Central scoring configuration.
//!
//! Both weight tables (the scenario-selection matrix and the composite
//! score weights) live here as one `ScoringConfig`, hashed into the run's
//! `config_hash` together with the k-means seed. Per-tenant overrides load
//! from the `scoring_config` key in `config_settings`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::Result;
use cuvee_core::{Store, TenantContext};
use cuvee_crm::{Scenario, SettingsRepository};

/// Feature weights for scenario selection (§ scenario matrix).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioWeights {
    pub recency: f64,
    pub monetary: f64,
    pub coverage: f64,
    pub families: f64,
    pub aroma_conf: f64,
}

/// Composite-score weights per scenario; each row sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub popularity: f64,
    pub price: f64,
    pub family: f64,
    pub rfm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub scenario_weights: BTreeMap<Scenario, ScenarioWeights>,
    pub score_weights: BTreeMap<Scenario, ScoreWeights>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let scenario_weights = BTreeMap::from([
            (
                Scenario::Winback,
                ScenarioWeights {
                    recency: 3.0,
                    monetary: 2.0,
                    coverage: 0.0,
                    families: 0.0,
                    aroma_conf: 1.0,
                },
            ),
            (
                Scenario::Rebuy,
                ScenarioWeights {
                    recency: -1.0,
                    monetary: 1.0,
                    coverage: 1.0,
                    families: 0.0,
                    aroma_conf: 1.0,
                },
            ),
            (
                Scenario::CrossSell,
                ScenarioWeights {
                    recency: -1.0,
                    monetary: 1.0,
                    coverage: 3.0,
                    families: 2.0,
                    aroma_conf: 1.0,
                },
            ),
            (
                Scenario::Upsell,
                ScenarioWeights {
                    recency: -1.0,
                    monetary: 2.0,
                    coverage: 1.0,
                    families: 0.0,
                    aroma_conf: 2.0,
                },
            ),
            (
                Scenario::Nurture,
                ScenarioWeights {
                    recency: 1.0,
                    monetary: 1.0,
                    coverage: 1.0,
                    families: 0.0,
                    aroma_conf: 1.0,
                },
            ),
        ]);

        let score_weights = BTreeMap::from([
            (
                Scenario::Winback,
                ScoreWeights {
                    popularity: 0.30,
                    price: 0.30,
                    family: 0.20,
                    rfm: 0.20,
                },
            ),
            (
                Scenario::Rebuy,
                ScoreWeights {
                    popularity: 0.30,
                    price: 0.20,
                    family: 0.40,
                    rfm: 0.10,
                },
            ),
            (
                Scenario::CrossSell,
                ScoreWeights {
                    popularity: 0.30,
                    price: 0.30,
                    family: 0.20,
                    rfm: 0.20,
                },
            ),
            (
                Scenario::Upsell,
                ScoreWeights {
                    popularity: 0.20,
                    price: 0.40,
                    family: 0.30,
                    rfm: 0.10,
                },
            ),
            (
                Scenario::Nurture,
                ScoreWeights {
                    popularity: 0.30,
                    price: 0.30,
                    family: 0.20,
                    rfm: 0.20,
                },
            ),
        ]);

        Self {
            scenario_weights,
            score_weights,
        }
    }
}

impl ScoringConfig {
    /// Loads the tenant's override from `config_settings` when present,
    /// falling back to the documented defaults. A malformed override is
    /// ignored with a warning rather than failing the run.
    pub async fn for_tenant(store: &Store, ctx: &TenantContext) -> Result<Self> {
        let settings = SettingsRepository::new(store.pool().clone(), ctx.clone());
        match settings.get("scoring_config").await? {
            Some(raw) => match serde_json::from_str::<ScoringConfig>(&raw) {
                Ok(config) => Ok(config),
                Err(err) => {
                    warn!(
                        tenant_id = %ctx.tenant_id,
                        error = %err,
                        "malformed scoring_config override, using defaults"
                    );
                    Ok(Self::default())
                }
            },
            None => Ok(Self::default()),
        }
    }

    pub fn scenario_weights_for(&self, scenario: Scenario) -> ScenarioWeights {
        self.scenario_weights
            .get(&scenario)
            .copied()
            .unwrap_or(ScenarioWeights {
                recency: 0.0,
                monetary: 0.0,
                coverage: 0.0,
                families: 0.0,
                aroma_conf: 0.0,
            })
    }

    pub fn score_weights_for(&self, scenario: Scenario) -> ScoreWeights {
        self.score_weights
            .get(&scenario)
            .copied()
            .unwrap_or(ScoreWeights {
                popularity: 0.25,
                price: 0.25,
                family: 0.25,
                rfm: 0.25,
            })
    }

    /// SHA-256 over the canonical JSON form plus the clustering seed.
    /// Recorded on the run row and echoed in the summary.
    pub fn config_hash(&self, seed: u64) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hasher.update(seed.to_le_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_score_rows_sum_to_one() {
        let config = ScoringConfig::default();
        for scenario in Scenario::ALL {
            let w = config.score_weights_for(scenario);
            let sum = w.popularity + w.price + w.family + w.rfm;
            assert!((sum - 1.0).abs() < 1e-9, "{scenario}: {sum}");
        }
    }

    #[test]
    fn hash_is_stable_and_seed_sensitive() {
        let config = ScoringConfig::default();
        assert_eq!(
            config.config_hash(42).unwrap(),
            config.config_hash(42).unwrap()
        );
        assert_ne!(
            config.config_hash(42).unwrap(),
            config.config_hash(43).unwrap()
        );
    }

    #[tokio::test]
    async fn tenant_override_wins_over_defaults() {
        let store = Store::in_memory().await.unwrap();
        let ctx = TenantContext::new(cuvee_core::TenantId(1));

        let mut custom = ScoringConfig::default();
        custom
            .scenario_weights
            .insert(
                Scenario::Winback,
                ScenarioWeights {
                    recency: 9.0,
                    monetary: 0.0,
                    coverage: 0.0,
                    families: 0.0,
                    aroma_conf: 0.0,
                },
            );
        SettingsRepository::new(store.pool().clone(), ctx.clone())
            .set(
                "scoring_config",
                &serde_json::to_string(&custom).unwrap(),
                None,
            )
            .await
            .unwrap();

        let loaded = ScoringConfig::for_tenant(&store, &ctx).await.unwrap();
        assert_eq!(loaded.scenario_weights_for(Scenario::Winback).recency, 9.0);
    }
}
