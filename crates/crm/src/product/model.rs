use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use cuvee_core::TenantId;

/// Catalogue product. The sensory axes (`aroma_*`, raw scale 0..5) and the
/// commercial attributes are optional; the recommendation engine treats a
/// missing value as neutral rather than disqualifying the product.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub tenant_id: TenantId,
    pub product_key: String,
    pub name: String,
    pub family_crm: Option<String>,
    pub sub_family: Option<String>,
    pub cepage: Option<String>,
    pub sucrosite_niveau: Option<String>,
    pub price_ttc: Option<f64>,
    pub margin: Option<f64>,
    pub premium_tier: Option<String>,
    pub price_band: Option<String>,
    pub aroma_fruit: Option<f64>,
    pub aroma_floral: Option<f64>,
    pub aroma_spice: Option<f64>,
    pub aroma_mineral: Option<f64>,
    pub aroma_acidity: Option<f64>,
    pub aroma_body: Option<f64>,
    pub aroma_tannin: Option<f64>,
    pub global_popularity_score: f64,
    pub season_tags: Option<String>,
    pub is_active: bool,
    pub is_archived: bool,
}

impl Product {
    /// Raw sensory axes in declaration order, `None` contributing 0.
    pub fn aroma_axes(&self) -> [f64; 7] {
        [
            self.aroma_fruit.unwrap_or(0.0),
            self.aroma_floral.unwrap_or(0.0),
            self.aroma_spice.unwrap_or(0.0),
            self.aroma_mineral.unwrap_or(0.0),
            self.aroma_acidity.unwrap_or(0.0),
            self.aroma_body.unwrap_or(0.0),
            self.aroma_tannin.unwrap_or(0.0),
        ]
    }

    /// Offerable means visible to candidate generation.
    pub fn is_offerable(&self) -> bool {
        self.is_active && !self.is_archived
    }
}

/// Mapping from a normalized raw product label to a canonical `product_key`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductAlias {
    pub id: i64,
    pub tenant_id: TenantId,
    pub label_raw: Option<String>,
    pub label_norm: String,
    pub product_key: String,
    pub confidence: f64,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Alias provenance values.
pub const ALIAS_SOURCE_MANUAL: &str = "manual";
pub const ALIAS_SOURCE_SUGGEST: &str = "suggest";
pub const ALIAS_SOURCE_AUTO: &str = "auto";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 64))]
    pub product_key: String,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub family_crm: Option<String>,
    pub sub_family: Option<String>,
    pub cepage: Option<String>,
    pub sucrosite_niveau: Option<String>,
    pub price_ttc: Option<f64>,
    pub margin: Option<f64>,
    pub premium_tier: Option<String>,
    pub price_band: Option<String>,
    pub aroma_axes: Option<[f64; 7]>,
    pub season_tags: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAliasRequest {
    /// Raw label as seen in the source export; normalized before storage.
    #[validate(length(min = 1, max = 255))]
    pub label: String,

    #[validate(length(min = 1, max = 64))]
    pub product_key: String,

    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    pub source: String,
}
