use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use cuvee_core::TenantId;

/// Schema version written into every typed JSON column on this entity.
pub const PROFILE_SCHEMA_VERSION: u32 = 1;

/// CRM client row. Base identity fields come from ingestion; the aggregate
/// fields (`total_spent` through `cluster`) are owned by the derived-metric
/// services and recomputed per tenant on demand.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: i64,
    pub tenant_id: TenantId,
    pub client_code: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub last_purchase_date: Option<NaiveDate>,
    pub total_spent: f64,
    pub total_orders: i64,
    pub average_order_value: f64,
    pub recency: Option<f64>,
    pub frequency: Option<f64>,
    pub monetary: Option<f64>,
    pub rfm_score: i64,
    pub rfm_segment: Option<String>,
    /// JSON text: [`PreferredFamilies`]
    pub preferred_families: Option<String>,
    pub budget_band: Option<String>,
    /// JSON text: [`AromaProfile`]
    pub aroma_profile: Option<String>,
    pub cluster: Option<String>,
    pub last_contact_date: Option<DateTime<Utc>>,
    pub email_opt_out: bool,
}

impl Client {
    pub fn preferred_families(&self) -> Result<Option<PreferredFamilies>> {
        match self.preferred_families.as_deref() {
            Some(raw) if !raw.is_empty() => Ok(Some(PreferredFamilies::decode(raw)?)),
            _ => Ok(None),
        }
    }

    pub fn aroma_profile(&self) -> Result<Option<AromaProfile>> {
        match self.aroma_profile.as_deref() {
            Some(raw) if !raw.is_empty() => Ok(Some(AromaProfile::decode(raw)?)),
            _ => Ok(None),
        }
    }
}

/// Budget bands over the tenant's AOV distribution (<= q33, <= q66, above).
pub const BUDGET_LOW: &str = "Low";
pub const BUDGET_MEDIUM: &str = "Medium";
pub const BUDGET_HIGH: &str = "High";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FamilyShare {
    pub family: String,
    pub share: f64,
}

/// Typed form of the `preferred_families` JSON column: the client's top
/// product families by purchase count, with their share of purchases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferredFamilies {
    pub schema_version: u32,
    pub families: Vec<FamilyShare>,
}

impl PreferredFamilies {
    pub fn new(families: Vec<FamilyShare>) -> Self {
        Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            families,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Sum of the shares of the top-2 families; the `coverage` feature of
    /// the scenario selector.
    pub fn coverage(&self) -> f64 {
        self.families.iter().take(2).map(|f| f.share).sum()
    }

    pub fn contains(&self, family: &str) -> bool {
        self.families.iter().any(|f| f.family == family)
    }
}

/// The seven sensory axes, each normalized to `[0, 1]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AromaAxes {
    pub fruit: f64,
    pub floral: f64,
    pub spice: f64,
    pub mineral: f64,
    pub acidity: f64,
    pub body: f64,
    pub tannin: f64,
}

impl AromaAxes {
    pub fn as_pairs(&self) -> [(&'static str, f64); 7] {
        [
            ("fruit", self.fruit),
            ("floral", self.floral),
            ("spice", self.spice),
            ("mineral", self.mineral),
            ("acidity", self.acidity),
            ("body", self.body),
            ("tannin", self.tannin),
        ]
    }
}

/// Typed form of the `aroma_profile` JSON column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AromaProfile {
    pub schema_version: u32,
    pub axes: AromaAxes,
    pub top_axes: Vec<(String, f64)>,
    pub confidence: f64,
    pub level: String,
}

impl AromaProfile {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Client creation request, used by seeding and manual entry paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateClientRequest {
    #[validate(length(min = 1, max = 64))]
    pub client_code: String,

    #[validate(length(max = 255))]
    pub name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    pub email_opt_out: bool,
}

/// Aggregate fields written back by the RFM service.
#[derive(Debug, Clone, Default)]
pub struct RfmUpdate {
    pub last_purchase_date: Option<NaiveDate>,
    pub total_spent: f64,
    pub total_orders: i64,
    pub average_order_value: f64,
    pub recency: Option<f64>,
    pub frequency: Option<f64>,
    pub monetary: Option<f64>,
    pub rfm_score: i64,
    pub rfm_segment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_families_roundtrip_and_coverage() {
        let prefs = PreferredFamilies::new(vec![
            FamilyShare {
                family: "Rouge".to_string(),
                share: 0.6,
            },
            FamilyShare {
                family: "Blanc".to_string(),
                share: 0.3,
            },
            FamilyShare {
                family: "Rosé".to_string(),
                share: 0.1,
            },
        ]);
        let encoded = prefs.encode().unwrap();
        let decoded = PreferredFamilies::decode(&encoded).unwrap();
        assert_eq!(decoded, prefs);
        assert_eq!(decoded.schema_version, PROFILE_SCHEMA_VERSION);
        assert!((decoded.coverage() - 0.9).abs() < 1e-9);
        assert!(decoded.contains("Rouge"));
        assert!(!decoded.contains("Orange"));
    }
}
