//! Run-level aggregation of per-client results into `RunSummaryStats`.

use std::collections::BTreeMap;

use crate::audit::ClientAudit;
use cuvee_crm::{RunSummaryStats, Scenario, Severity, RUN_SCHEMA_VERSION};

/// Per-client slice the summarizer consumes.
pub struct ClientSummaryInput<'a> {
    pub scenario: Option<Scenario>,
    pub reco_count: usize,
    pub audit: &'a ClientAudit,
}

/// Folds client results into the persisted run summary. The run-level gate
/// is `n_errors == 0 && audit_score >= 80`.
pub fn summarize(
    clients: &[ClientSummaryInput<'_>],
    config_hash: String,
    seed: u64,
) -> RunSummaryStats {
    let total_clients = clients.len() as i64;
    let mut total_recommendations = 0i64;
    let mut eligible_clients = 0i64;
    let mut n_errors = 0i64;
    let mut n_warns = 0i64;
    let mut scenario_counts: BTreeMap<String, i64> = BTreeMap::new();
    let mut error_counts: BTreeMap<String, i64> = BTreeMap::new();

    for client in clients {
        total_recommendations += client.reco_count as i64;
        if client.audit.eligible {
            eligible_clients += 1;
        }
        if let Some(scenario) = client.scenario {
            *scenario_counts.entry(scenario.to_string()).or_insert(0) += 1;
        }
        for issue in &client.audit.issues {
            match issue.severity {
                Severity::Error => {
                    n_errors += 1;
                    *error_counts.entry(issue.rule_code.clone()).or_insert(0) += 1;
                }
                Severity::Warn => n_warns += 1,
            }
        }
    }

    let mut top_errors: Vec<(String, i64)> = error_counts.into_iter().collect();
    top_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_errors.truncate(5);

    let gating_rate = if total_clients > 0 {
        eligible_clients as f64 / total_clients as f64
    } else {
        0.0
    };
    let audit_score = (100.0 - 40.0 * n_errors as f64 - 10.0 * n_warns as f64).max(0.0);
    let gate_export = n_errors == 0 && audit_score >= 80.0;

    RunSummaryStats {
        schema_version: RUN_SCHEMA_VERSION,
        gating_rate,
        total_clients,
        total_recommendations,
        scenario_counts,
        top_errors,
        n_errors,
        n_warns,
        audit_score,
        gate_export,
        config_hash,
        seed,
    }
}
