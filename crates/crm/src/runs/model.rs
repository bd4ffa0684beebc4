use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use cuvee_core::{RunId, TenantId};

/// Schema version for the run-artifact JSON columns.
pub const RUN_SCHEMA_VERSION: u32 = 1;

/// Marketing intent chosen per client. Declaration order is the tie-break
/// order of the scenario selector.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Scenario {
    Winback,
    Rebuy,
    CrossSell,
    Upsell,
    Nurture,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Winback,
        Scenario::Rebuy,
        Scenario::CrossSell,
        Scenario::Upsell,
        Scenario::Nurture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Winback => "winback",
            Scenario::Rebuy => "rebuy",
            Scenario::CrossSell => "cross_sell",
            Scenario::Upsell => "upsell",
            Scenario::Nurture => "nurture",
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Issue severity for the gating audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warn,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => f.write_str("ERROR"),
            Severity::Warn => f.write_str("WARN"),
        }
    }
}

/// Metadata for one recommendation cycle. Status transitions are
/// `running -> completed | failed`; a failed run is never reused.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecoRun {
    pub id: i64,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dataset_version: Option<String>,
    pub config_hash: Option<String>,
    pub code_version: Option<String>,
    pub status: RunStatus,
}

#[derive(Debug, Clone)]
pub struct NewRecoRun {
    pub run_id: RunId,
    pub dataset_version: Option<String>,
    pub config_hash: Option<String>,
    pub code_version: Option<String>,
}

/// One ranked recommendation slot. For each `(run_id, customer_code)` the
/// ranks are contiguous from 1 and product keys are distinct.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecoOutput {
    pub id: i64,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub customer_code: String,
    pub scenario: Scenario,
    pub rank: i64,
    pub product_key: String,
    pub score: f64,
    pub explain_short: String,
    /// JSON text: [`ScoreReasons`]
    pub reasons_json: String,
}

impl RecoOutput {
    pub fn reasons(&self) -> Result<ScoreReasons> {
        Ok(serde_json::from_str(&self.reasons_json)?)
    }
}

/// Typed form of `reasons_json`: the composite-score term breakdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreReasons {
    pub schema_version: u32,
    pub scenario: Scenario,
    pub popularity: f64,
    pub price_fit: f64,
    pub family_fit: f64,
    pub rfm_norm: f64,
}

impl ScoreReasons {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone)]
pub struct NewRecoOutput {
    pub customer_code: String,
    pub scenario: Scenario,
    pub rank: i64,
    pub product_key: String,
    pub score: f64,
    pub explain_short: String,
    pub reasons: ScoreReasons,
}

/// One audit issue for a `(run, client)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditOutput {
    pub id: i64,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub customer_code: String,
    pub severity: Severity,
    pub rule_code: String,
    pub details_json: String,
}

#[derive(Debug, Clone)]
pub struct NewAuditOutput {
    pub customer_code: String,
    pub severity: Severity,
    pub rule_code: String,
    pub details: serde_json::Value,
}

/// Eligibility verdict for a client in a run; unique per `(run, client)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NextActionOutput {
    pub id: i64,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub customer_code: String,
    pub eligible: bool,
    pub reason: Option<String>,
    pub scenario: Option<Scenario>,
    pub audit_score: f64,
}

#[derive(Debug, Clone)]
pub struct NewNextAction {
    pub customer_code: String,
    pub eligible: bool,
    pub reason: Option<String>,
    pub scenario: Option<Scenario>,
    pub audit_score: f64,
}

/// Persisted run-level aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunSummary {
    pub id: i64,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    /// JSON text: [`RunSummaryStats`]
    pub summary_json: String,
}

impl RunSummary {
    pub fn stats(&self) -> Result<RunSummaryStats> {
        Ok(serde_json::from_str(&self.summary_json)?)
    }
}

/// Typed form of `summary_json`. `gate_export` must hold
/// `n_errors == 0 && audit_score >= 80`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummaryStats {
    pub schema_version: u32,
    pub gating_rate: f64,
    pub total_clients: i64,
    pub total_recommendations: i64,
    pub scenario_counts: BTreeMap<String, i64>,
    pub top_errors: Vec<(String, i64)>,
    pub n_errors: i64,
    pub n_warns: i64,
    pub audit_score: f64,
    pub gate_export: bool,
    pub config_hash: String,
    pub seed: u64,
}

impl RunSummaryStats {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Everything a completed run writes, applied in one transaction.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub outputs: Vec<NewRecoOutput>,
    pub audits: Vec<NewAuditOutput>,
    pub next_actions: Vec<NewNextAction>,
    pub summary: RunSummaryStats,
}
