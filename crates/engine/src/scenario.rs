//! Scenario selection: feature-weighted argmax with a rule-based fallback.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::scoring::ScenarioWeights;
use cuvee_crm::{Client, Scenario, BUDGET_LOW};

/// Features feeding the scenario matrix. Missing values default to 0.
#[derive(Debug, Clone, Default)]
pub struct ScenarioFeatures {
    /// Days since last purchase.
    pub recency: f64,
    /// Total spent.
    pub monetary: f64,
    /// Sum of shares of the top-2 preferred families.
    pub coverage: f64,
    /// Distinct product families the client has purchased.
    pub num_families: usize,
    /// Confidence of the aroma profile.
    pub aroma_conf: f64,
}

impl ScenarioFeatures {
    pub fn from_client(client: &Client, num_families: usize) -> Self {
        let coverage = client
            .preferred_families()
            .ok()
            .flatten()
            .map(|p| p.coverage())
            .unwrap_or(0.0);
        let aroma_conf = client
            .aroma_profile()
            .ok()
            .flatten()
            .map(|p| p.confidence)
            .unwrap_or(0.0);
        Self {
            recency: client.recency.unwrap_or(0.0),
            monetary: client.monetary.unwrap_or(0.0),
            coverage,
            num_families,
            aroma_conf,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioDecision {
    pub scenario: Scenario,
    pub scores: BTreeMap<Scenario, f64>,
}

/// Computes every scenario score and picks the argmax. Ties resolve in
/// scenario declaration order.
pub fn decide(
    features: &ScenarioFeatures,
    weights: &BTreeMap<Scenario, ScenarioWeights>,
) -> ScenarioDecision {
    let family_pressure = 1.0 / (1.0 + features.num_families as f64);

    let mut scores = BTreeMap::new();
    let mut best = Scenario::ALL[0];
    let mut best_score = f64::NEG_INFINITY;
    for scenario in Scenario::ALL {
        let w = weights.get(&scenario).copied().unwrap_or(ScenarioWeights {
            recency: 0.0,
            monetary: 0.0,
            coverage: 0.0,
            families: 0.0,
            aroma_conf: 0.0,
        });
        let score = w.recency * features.recency
            + w.monetary * features.monetary
            + w.coverage * features.coverage
            + w.families * family_pressure
            + w.aroma_conf * features.aroma_conf;
        scores.insert(scenario, score);
        if score > best_score {
            best_score = score;
            best = scenario;
        }
    }

    ScenarioDecision {
        scenario: best,
        scores,
    }
}

/// Rule-based fallback used when no weight matrix is configured. Must agree
/// with the weighted path's intent on the archetypes it names.
pub fn decide_rule_based(client: &Client, today: NaiveDate) -> Scenario {
    if client.rfm_score == 0 {
        return Scenario::Nurture;
    }
    if let Some(last) = client.last_purchase_date {
        let days = (today - last).num_days();
        if days > 180 {
            return Scenario::Winback;
        }
        if days > 30 {
            return Scenario::Rebuy;
        }
    }
    if client.budget_band.as_deref() == Some(BUDGET_LOW) {
        return Scenario::Upsell;
    }
    Scenario::CrossSell
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoringConfig;
    use cuvee_core::TenantId;

    fn client() -> Client {
        Client {
            id: 1,
            tenant_id: TenantId(1),
            client_code: "C1".to_string(),
            name: None,
            email: None,
            last_purchase_date: None,
            total_spent: 0.0,
            total_orders: 0,
            average_order_value: 0.0,
            recency: None,
            frequency: None,
            monetary: None,
            rfm_score: 0,
            rfm_segment: None,
            preferred_families: None,
            budget_band: None,
            aroma_profile: None,
            cluster: None,
            last_contact_date: None,
            email_opt_out: false,
        }
    }

    #[test]
    fn long_silence_selects_winback() {
        let weights = ScoringConfig::default().scenario_weights;
        let features = ScenarioFeatures {
            recency: 200.0,
            monetary: 50.0,
            coverage: 0.5,
            num_families: 2,
            aroma_conf: 0.4,
        };
        let decision = decide(&features, &weights);
        assert_eq!(decision.scenario, Scenario::Winback);
        assert_eq!(decision.scores.len(), 5);
    }

    #[test]
    fn concentrated_recent_buyer_selects_cross_sell() {
        let weights = ScoringConfig::default().scenario_weights;
        // Fresh purchase, concentrated preferences: coverage and family
        // pressure are the only live terms.
        let features = ScenarioFeatures {
            recency: 0.0,
            monetary: 0.0,
            coverage: 1.0,
            num_families: 1,
            aroma_conf: 0.5,
        };
        let decision = decide(&features, &weights);
        assert_eq!(decision.scenario, Scenario::CrossSell);
    }

    #[test]
    fn fallback_rules_cover_the_ladder() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let zero_rfm = client();
        assert_eq!(decide_rule_based(&zero_rfm, today), Scenario::Nurture);

        let mut dormant = client();
        dormant.rfm_score = 211;
        dormant.last_purchase_date = NaiveDate::from_ymd_opt(2023, 6, 1);
        assert_eq!(decide_rule_based(&dormant, today), Scenario::Winback);

        let mut lapsing = client();
        lapsing.rfm_score = 311;
        lapsing.last_purchase_date = NaiveDate::from_ymd_opt(2024, 4, 1);
        assert_eq!(decide_rule_based(&lapsing, today), Scenario::Rebuy);

        let mut thrifty = client();
        thrifty.rfm_score = 511;
        thrifty.last_purchase_date = NaiveDate::from_ymd_opt(2024, 5, 25);
        thrifty.budget_band = Some("Low".to_string());
        assert_eq!(decide_rule_based(&thrifty, today), Scenario::Upsell);

        let mut comfortable = client();
        comfortable.rfm_score = 555;
        comfortable.last_purchase_date = NaiveDate::from_ymd_opt(2024, 5, 25);
        comfortable.budget_band = Some("High".to_string());
        assert_eq!(decide_rule_based(&comfortable, today), Scenario::CrossSell);
    }
}
