//! Client aroma profiles: amount-weighted average of product sensory axes.

use std::collections::{HashMap, HashSet};
use tracing::info;

use cuvee_core::{Store, TenantContext};
use cuvee_crm::{
    AromaAxes, AromaProfile, ClientRepository, ProductRepository, Result, Sale, SaleRepository,
    SqliteClientRepository, SqliteProductRepository, PROFILE_SCHEMA_VERSION,
};

pub struct AromaService {
    store: Store,
    ctx: TenantContext,
}

impl AromaService {
    pub fn new(store: Store, ctx: TenantContext) -> Self {
        Self { store, ctx }
    }

    /// Computes and stores the aroma profile of every client in the tenant.
    /// Returns clients updated.
    pub async fn recompute_profiles(&self) -> Result<usize> {
        let _guard = self.store.tenant_lock(self.ctx.tenant_id).await;
        let products = SqliteProductRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let axes_by_key: HashMap<String, [f64; 7]> = products
            .iter()
            .map(|p| (p.product_key.clone(), p.aroma_axes()))
            .collect();

        let sales = SaleRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let mut purchases: HashMap<String, Vec<&Sale>> = HashMap::new();
        for sale in &sales {
            purchases
                .entry(sale.client_code.clone())
                .or_default()
                .push(sale);
        }

        let client_repo = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone());
        let clients = client_repo.list().await?;
        let mut updated = 0usize;
        for client in &clients {
            let client_purchases = purchases
                .get(&client.client_code)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let profile = profile_for(client_purchases, &axes_by_key);
            client_repo
                .update_aroma_profile(&client.client_code, &profile.encode()?)
                .await?;
            updated += 1;
        }

        info!(tenant_id = %self.ctx.tenant_id, updated, "aroma profiles recomputed");
        Ok(updated)
    }
}

const AXIS_NAMES: [&str; 7] = [
    "fruit", "floral", "spice", "mineral", "acidity", "body", "tannin",
];

/// Weighted profile over a purchase history. Weights are sale amounts; raw
/// axes (0..5) are normalized by 5 into [0, 1].
pub fn profile_for(purchases: &[&Sale], axes_by_key: &HashMap<String, [f64; 7]>) -> AromaProfile {
    if purchases.is_empty() {
        return AromaProfile {
            schema_version: PROFILE_SCHEMA_VERSION,
            axes: AromaAxes::default(),
            top_axes: Vec::new(),
            confidence: 0.0,
            level: "Low".to_string(),
        };
    }

    let mut total_weight = 0.0;
    let mut aggregate = [0.0f64; 7];
    let mut documents: HashSet<&str> = HashSet::new();
    for sale in purchases {
        let weight = sale.amount.unwrap_or(0.0);
        total_weight += weight;
        if !sale.document_id.is_empty() {
            documents.insert(sale.document_id.as_str());
        }
        let Some(axes) = sale.product_key.as_deref().and_then(|k| axes_by_key.get(k)) else {
            continue;
        };
        for (slot, axis) in aggregate.iter_mut().zip(axes.iter()) {
            *slot += axis * weight;
        }
    }

    let mut normalized = [0.0f64; 7];
    if total_weight > 0.0 {
        for (slot, value) in normalized.iter_mut().zip(aggregate.iter()) {
            *slot = round3(((value / total_weight) / 5.0).clamp(0.0, 1.0));
        }
    }

    let mut ranked: Vec<(String, f64)> = AXIS_NAMES
        .iter()
        .zip(normalized.iter())
        .map(|(name, value)| (name.to_string(), *value))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top_axes: Vec<(String, f64)> = ranked.into_iter().take(3).collect();

    let n_orders = if documents.is_empty() {
        purchases.len()
    } else {
        documents.len()
    };
    let mean = normalized.iter().sum::<f64>() / 7.0;
    let mean_abs_dev = normalized.iter().map(|v| (v - mean).abs()).sum::<f64>() / 7.0;
    let stability = 1.0 - mean_abs_dev;
    let volume_factor = (n_orders as f64 / 10.0).min(1.0);
    let confidence = round3((0.2 + 0.8 * volume_factor * stability).clamp(0.0, 1.0));

    let level = if confidence >= 0.7 {
        "High"
    } else if confidence >= 0.45 {
        "Medium"
    } else {
        "Low"
    };

    AromaProfile {
        schema_version: PROFILE_SCHEMA_VERSION,
        axes: AromaAxes {
            fruit: normalized[0],
            floral: normalized[1],
            spice: normalized[2],
            mineral: normalized[3],
            acidity: normalized[4],
            body: normalized[5],
            tannin: normalized[6],
        },
        top_axes,
        confidence,
        level: level.to_string(),
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cuvee_core::TenantId;

    fn sale(doc: &str, key: &str, amount: f64) -> Sale {
        Sale {
            id: 0,
            tenant_id: TenantId(1),
            document_id: doc.to_string(),
            product_key: Some(key.to_string()),
            client_code: "C1".to_string(),
            quantity: Some(1.0),
            amount: Some(amount),
            sale_date: None,
        }
    }

    #[test]
    fn no_purchases_means_zero_confidence() {
        let profile = profile_for(&[], &HashMap::new());
        assert_eq!(profile.confidence, 0.0);
        assert_eq!(profile.level, "Low");
        assert!(profile.top_axes.is_empty());
    }

    #[test]
    fn axes_are_amount_weighted_and_scaled() {
        let mut axes_by_key = HashMap::new();
        // Full-fruit product and a neutral one.
        axes_by_key.insert("P1".to_string(), [5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        axes_by_key.insert("P2".to_string(), [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let s1 = sale("I1", "P1", 30.0);
        let s2 = sale("I2", "P2", 10.0);
        let profile = profile_for(&[&s1, &s2], &axes_by_key);

        // fruit = ((5*30 + 0*10) / 40) / 5 = 0.75
        assert_relative_eq!(profile.axes.fruit, 0.75);
        assert_eq!(profile.top_axes[0].0, "fruit");
        assert_eq!(profile.level, "Low");
    }

    #[test]
    fn confidence_grows_with_order_volume() {
        let mut axes_by_key = HashMap::new();
        axes_by_key.insert("P1".to_string(), [2.5; 7]);

        let few: Vec<Sale> = (0..2).map(|i| sale(&format!("I{i}"), "P1", 10.0)).collect();
        let many: Vec<Sale> = (0..12).map(|i| sale(&format!("I{i}"), "P1", 10.0)).collect();
        let few_refs: Vec<&Sale> = few.iter().collect();
        let many_refs: Vec<&Sale> = many.iter().collect();

        let low = profile_for(&few_refs, &axes_by_key);
        let high = profile_for(&many_refs, &axes_by_key);
        assert!(high.confidence > low.confidence);
        // Flat profile, 12 orders: 0.2 + 0.8 * 1.0 * 1.0 = 1.0.
        assert_relative_eq!(high.confidence, 1.0);
        assert_eq!(high.level, "High");
    }
}
