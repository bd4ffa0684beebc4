//! Per-client gating audit.
//!
//! Deterministic rule evaluation over a client and its recommendations for
//! one run. Rule violations are never fatal: errors and warnings lower the
//! audit score and can make the client ineligible, nothing aborts.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;

use cuvee_crm::{
    contact::{STATUS_BOUNCE, STATUS_UNSUBSCRIBE},
    Client, ContactEvent, NewAuditOutput, NewRecoOutput, Product, Sale, Scenario, Severity,
};

/// Fallback reason when the score drops below threshold without a recorded
/// issue.
pub const REASON_SCORE_BELOW_THRESHOLD: &str = "AUDIT_SCORE_BELOW_THRESHOLD";

pub struct ClientAuditInput<'a> {
    pub client: &'a Client,
    pub recos: &'a [NewRecoOutput],
    pub product_map: &'a HashMap<String, Product>,
    pub contact_events: &'a [ContactEvent],
    pub purchases: &'a [Sale],
    pub silence_window_days: i64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ClientAudit {
    pub issues: Vec<NewAuditOutput>,
    pub audit_score: f64,
    pub eligible: bool,
    pub reason: Option<String>,
}

/// Applies the gating rules to one client. `eligible` holds
/// `errors == 0 && audit_score >= 80`.
pub fn audit_client(input: &ClientAuditInput<'_>) -> ClientAudit {
    let mut issues: Vec<NewAuditOutput> = Vec::new();
    let mut errors = 0usize;
    let mut warns = 0usize;
    let customer_code = input.client.client_code.clone();

    let mut push = |severity: Severity,
                    rule_code: &str,
                    details: serde_json::Value,
                    issues: &mut Vec<NewAuditOutput>,
                    errors: &mut usize,
                    warns: &mut usize| {
        match severity {
            Severity::Error => *errors += 1,
            Severity::Warn => *warns += 1,
        }
        issues.push(NewAuditOutput {
            customer_code: customer_code.clone(),
            severity,
            rule_code: rule_code.to_string(),
            details,
        });
    };

    if input.client.email.as_deref().unwrap_or("").is_empty() {
        push(
            Severity::Error,
            "MISSING_EMAIL",
            json!({"message": "email missing"}),
            &mut issues,
            &mut errors,
            &mut warns,
        );
    }

    if input.client.email_opt_out {
        push(
            Severity::Error,
            "OPTOUT_OR_BOUNCE",
            json!({"message": "client opted out"}),
            &mut issues,
            &mut errors,
            &mut warns,
        );
    }
    if let Some(event) = input.contact_events.iter().find(|e| {
        e.status
            .as_deref()
            .map(|s| {
                let s = s.to_lowercase();
                s == STATUS_BOUNCE || s == STATUS_UNSUBSCRIBE
            })
            .unwrap_or(false)
    }) {
        push(
            Severity::Error,
            "OPTOUT_OR_BOUNCE",
            json!({"status": event.status}),
            &mut issues,
            &mut errors,
            &mut warns,
        );
    }

    if let Some(event) = input
        .contact_events
        .iter()
        .find(|e| (input.now - e.contact_date).num_days() < input.silence_window_days)
    {
        push(
            Severity::Error,
            "SILENCE_WINDOW",
            json!({"contact_date": event.contact_date.to_rfc3339()}),
            &mut issues,
            &mut errors,
            &mut warns,
        );
    }

    let mut reco_counts: HashMap<&str, usize> = HashMap::new();
    for reco in input.recos {
        *reco_counts.entry(reco.product_key.as_str()).or_insert(0) += 1;
    }
    let duplicates: Vec<&str> = reco_counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(key, _)| *key)
        .collect();
    if !duplicates.is_empty() {
        push(
            Severity::Error,
            "RECENT_DUPLICATE",
            json!({"products": duplicates}),
            &mut issues,
            &mut errors,
            &mut warns,
        );
    }

    let purchased_keys: Vec<&str> = input
        .purchases
        .iter()
        .filter_map(|s| s.product_key.as_deref())
        .collect();
    let avg_price = average_purchase_price(input.purchases, input.product_map);

    for reco in input.recos {
        let Some(product) = input.product_map.get(reco.product_key.as_str()) else {
            continue;
        };
        if reco.scenario == Scenario::Upsell {
            if let Some(price) = product.price_ttc {
                if price <= avg_price {
                    push(
                        Severity::Error,
                        "UPSELL_NOT_HIGHER",
                        json!({
                            "product_key": product.product_key,
                            "price": price,
                            "avg_price": avg_price,
                        }),
                        &mut issues,
                        &mut errors,
                        &mut warns,
                    );
                }
            }
        }
        if reco.scenario == Scenario::CrossSell
            && purchased_keys.contains(&reco.product_key.as_str())
        {
            push(
                Severity::Warn,
                "CROSS_SELL_NOT_NEW",
                json!({"product_key": reco.product_key}),
                &mut issues,
                &mut errors,
                &mut warns,
            );
        }
    }

    if input.recos.len() >= 3 {
        let mut family_counts: HashMap<&str, usize> = HashMap::new();
        for reco in input.recos {
            if let Some(family) = input
                .product_map
                .get(reco.product_key.as_str())
                .and_then(|p| p.family_crm.as_deref())
            {
                *family_counts.entry(family).or_insert(0) += 1;
            }
        }
        if let Some((family, count)) = family_counts.iter().max_by_key(|(_, count)| **count) {
            let share = *count as f64 / input.recos.len() as f64;
            if share > 0.7 {
                push(
                    Severity::Warn,
                    "LOW_DIVERSITY",
                    json!({"family": family, "share": share}),
                    &mut issues,
                    &mut errors,
                    &mut warns,
                );
            }
        }
    }

    if let Some(dominant) = dominant_sugar(input.purchases, input.product_map) {
        for reco in input.recos {
            let Some(sugar) = input
                .product_map
                .get(reco.product_key.as_str())
                .and_then(|p| p.sucrosite_niveau.as_deref())
            else {
                continue;
            };
            if sugar.to_lowercase() != dominant {
                push(
                    Severity::Warn,
                    "SUGAR_MISMATCH",
                    json!({
                        "product_key": reco.product_key,
                        "suggested": sugar,
                        "preferred": dominant,
                    }),
                    &mut issues,
                    &mut errors,
                    &mut warns,
                );
                break;
            }
        }
    }

    let audit_score = (100.0 - 40.0 * errors as f64 - 10.0 * warns as f64).max(0.0);
    let eligible = errors == 0 && audit_score >= 80.0;
    let reason = if eligible {
        None
    } else if let Some(first) = issues.first() {
        Some(first.rule_code.clone())
    } else {
        Some(REASON_SCORE_BELOW_THRESHOLD.to_string())
    };

    ClientAudit {
        issues,
        audit_score,
        eligible,
        reason,
    }
}

/// Mean catalogue price over the client's purchases; 0 when unknown.
pub fn average_purchase_price(purchases: &[Sale], product_map: &HashMap<String, Product>) -> f64 {
    let prices: Vec<f64> = purchases
        .iter()
        .filter_map(|sale| sale.product_key.as_deref())
        .filter_map(|key| product_map.get(key))
        .filter_map(|product| product.price_ttc)
        .collect();
    if prices.is_empty() {
        return 0.0;
    }
    prices.iter().sum::<f64>() / prices.len() as f64
}

/// Most frequent sucrosity level across purchases, lowercased.
fn dominant_sugar(purchases: &[Sale], product_map: &HashMap<String, Product>) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for sale in purchases {
        let Some(sugar) = sale
            .product_key
            .as_deref()
            .and_then(|key| product_map.get(key))
            .and_then(|product| product.sucrosite_niveau.as_deref())
        else {
            continue;
        };
        *counts.entry(sugar.to_lowercase()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(sugar, _)| sugar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuvee_core::TenantId;
    use cuvee_crm::{ScoreReasons, RUN_SCHEMA_VERSION};

    fn client(email: Option<&str>) -> Client {
        Client {
            id: 1,
            tenant_id: TenantId(1),
            client_code: "C1".to_string(),
            name: None,
            email: email.map(|e| e.to_string()),
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

    fn product(key: &str, price: Option<f64>, family: Option<&str>) -> Product {
        Product {
            id: 0,
            tenant_id: TenantId(1),
            product_key: key.to_string(),
            name: key.to_string(),
            family_crm: family.map(|f| f.to_string()),
            sub_family: None,
            cepage: None,
            sucrosite_niveau: None,
            price_ttc: price,
            margin: None,
            premium_tier: None,
            price_band: None,
            aroma_fruit: None,
            aroma_floral: None,
            aroma_spice: None,
            aroma_mineral: None,
            aroma_acidity: None,
            aroma_body: None,
            aroma_tannin: None,
            global_popularity_score: 0.0,
            season_tags: None,
            is_active: true,
            is_archived: false,
        }
    }

    fn reco(scenario: Scenario, key: &str) -> NewRecoOutput {
        NewRecoOutput {
            customer_code: "C1".to_string(),
            scenario,
            rank: 1,
            product_key: key.to_string(),
            score: 0.5,
            explain_short: String::new(),
            reasons: ScoreReasons {
                schema_version: RUN_SCHEMA_VERSION,
                scenario,
                popularity: 0.0,
                price_fit: 0.0,
                family_fit: 0.0,
                rfm_norm: 0.0,
            },
        }
    }

    fn sale(key: &str) -> Sale {
        Sale {
            id: 0,
            tenant_id: TenantId(1),
            document_id: "INV-1".to_string(),
            product_key: Some(key.to_string()),
            client_code: "C1".to_string(),
            quantity: Some(1.0),
            amount: Some(10.0),
            sale_date: None,
        }
    }

    fn input<'a>(
        client: &'a Client,
        recos: &'a [NewRecoOutput],
        product_map: &'a HashMap<String, Product>,
        contact_events: &'a [ContactEvent],
        purchases: &'a [Sale],
    ) -> ClientAuditInput<'a> {
        ClientAuditInput {
            client,
            recos,
            product_map,
            contact_events,
            purchases,
            silence_window_days: 7,
            now: Utc::now(),
        }
    }

    #[test]
    fn missing_email_is_a_blocking_error() {
        let client = client(None);
        let map = HashMap::new();
        let audit = audit_client(&input(&client, &[], &map, &[], &[]));
        assert_eq!(audit.audit_score, 60.0);
        assert!(!audit.eligible);
        assert_eq!(audit.reason.as_deref(), Some("MISSING_EMAIL"));
    }

    #[test]
    fn upsell_below_average_price_is_an_error() {
        let client = client(Some("c1@example.com"));
        let mut map = HashMap::new();
        map.insert("P1".to_string(), product("P1", Some(10.0), Some("Rouge")));
        map.insert("P2".to_string(), product("P2", Some(8.0), Some("Rouge")));

        let purchases = vec![sale("P1")];
        let recos = vec![reco(Scenario::Upsell, "P2")];
        let audit = audit_client(&input(&client, &recos, &map, &[], &purchases));

        assert!(!audit.eligible);
        assert!(audit
            .issues
            .iter()
            .any(|i| i.rule_code == "UPSELL_NOT_HIGHER" && i.severity == Severity::Error));
    }

    #[test]
    fn recent_contact_violates_silence_window() {
        let client = client(Some("c1@example.com"));
        let map = HashMap::new();
        let events = vec![ContactEvent {
            id: 1,
            tenant_id: TenantId(1),
            client_id: 1,
            contact_date: Utc::now() - chrono::Duration::days(2),
            channel: Some("email".to_string()),
            status: Some("delivered".to_string()),
            campaign_id: None,
        }];
        let audit = audit_client(&input(&client, &[], &map, &events, &[]));
        assert!(!audit.eligible);
        assert_eq!(audit.reason.as_deref(), Some("SILENCE_WINDOW"));
    }

    #[test]
    fn two_warnings_keep_the_client_eligible() {
        let client = client(Some("c1@example.com"));
        let mut map = HashMap::new();
        map.insert("P1".to_string(), product("P1", Some(10.0), Some("Rouge")));

        // Cross-sell of an already-purchased product: one warning.
        let purchases = vec![sale("P1")];
        let recos = vec![reco(Scenario::CrossSell, "P1")];
        let audit = audit_client(&input(&client, &recos, &map, &[], &purchases));

        assert_eq!(audit.audit_score, 90.0);
        assert!(audit.eligible);
        assert!(audit.reason.is_none());
    }

    #[test]
    fn low_diversity_flags_concentrated_slates() {
        let client = client(Some("c1@example.com"));
        let mut map = HashMap::new();
        map.insert("P1".to_string(), product("P1", None, Some("Rouge")));
        map.insert("P2".to_string(), product("P2", None, Some("Rouge")));
        map.insert("P3".to_string(), product("P3", None, Some("Rouge")));

        let recos = vec![
            reco(Scenario::Nurture, "P1"),
            reco(Scenario::Nurture, "P2"),
            reco(Scenario::Nurture, "P3"),
        ];
        let audit = audit_client(&input(&client, &recos, &map, &[], &[]));
        assert!(audit
            .issues
            .iter()
            .any(|i| i.rule_code == "LOW_DIVERSITY" && i.severity == Severity::Warn));
        // One warning only: still eligible.
        assert!(audit.eligible);
    }
}
