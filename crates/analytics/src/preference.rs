//! Client preferences (top families, budget band) and product popularity.

use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::quantile::quantile;
use cuvee_core::{Store, TenantContext};
use cuvee_crm::{
    ClientRepository, FamilyShare, PreferredFamilies, ProductRepository, Result, SaleRepository,
    SqliteClientRepository, SqliteProductRepository, BUDGET_HIGH, BUDGET_LOW, BUDGET_MEDIUM,
};

pub struct PreferenceService {
    store: Store,
    ctx: TenantContext,
    low_quantile: f64,
    high_quantile: f64,
}

impl PreferenceService {
    pub fn new(store: Store, ctx: TenantContext) -> Self {
        Self::with_quantiles(store, ctx, 0.33, 0.66)
    }

    pub fn with_quantiles(
        store: Store,
        ctx: TenantContext,
        low_quantile: f64,
        high_quantile: f64,
    ) -> Self {
        Self {
            store,
            ctx,
            low_quantile,
            high_quantile,
        }
    }

    /// Writes `preferred_families` (top-2 with shares) and `budget_band`
    /// for every client of the tenant. Returns clients updated.
    pub async fn recompute_preferences(&self) -> Result<usize> {
        let _guard = self.store.tenant_lock(self.ctx.tenant_id).await;
        let products = SqliteProductRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let family_map: HashMap<String, String> = products
            .into_iter()
            .map(|p| {
                let family = p.family_crm.unwrap_or_else(|| "unknown".to_string());
                (p.product_key, family)
            })
            .collect();

        let sales = SaleRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let mut client_families: HashMap<String, BTreeMap<String, u64>> = HashMap::new();
        for sale in &sales {
            let Some(key) = sale.product_key.as_deref() else {
                continue;
            };
            let family = family_map
                .get(key)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            *client_families
                .entry(sale.client_code.clone())
                .or_default()
                .entry(family)
                .or_insert(0) += 1;
        }

        let client_repo = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone());
        let clients = client_repo.list().await?;

        let aovs: Vec<f64> = clients
            .iter()
            .map(|c| c.average_order_value)
            .filter(|aov| *aov > 0.0)
            .collect();
        let low = quantile(&aovs, self.low_quantile).unwrap_or(0.0);
        let high = quantile(&aovs, self.high_quantile).unwrap_or(0.0);

        let mut updated = 0usize;
        for client in &clients {
            let preferred = client_families.get(&client.client_code).map(|counts| {
                let total: u64 = counts.values().sum();
                let mut ranked: Vec<(&String, &u64)> = counts.iter().collect();
                // Most purchased first, stable by family name.
                ranked.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
                PreferredFamilies::new(
                    ranked
                        .into_iter()
                        .take(2)
                        .map(|(family, count)| FamilyShare {
                            family: family.clone(),
                            share: *count as f64 / total as f64,
                        })
                        .collect(),
                )
            });
            let encoded = match &preferred {
                Some(p) => Some(p.encode()?),
                None => None,
            };

            let aov = client.average_order_value;
            let band = if aov <= 0.0 || high <= 0.0 {
                None
            } else if aov <= low {
                Some(BUDGET_LOW)
            } else if aov <= high {
                Some(BUDGET_MEDIUM)
            } else {
                Some(BUDGET_HIGH)
            };

            client_repo
                .update_preferences(&client.client_code, encoded.as_deref(), band)
                .await?;
            updated += 1;
        }

        info!(tenant_id = %self.ctx.tenant_id, updated, "preferences recomputed");
        Ok(updated)
    }

    /// `global_popularity_score(p) = sales_count(p) / total_sales(tenant)`,
    /// clamped to [0, 1]. Recomputed on demand; there is no invalidation
    /// hook after new sales are ingested.
    pub async fn refresh_product_popularity(&self) -> Result<usize> {
        let _guard = self.store.tenant_lock(self.ctx.tenant_id).await;
        let sales = SaleRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        if sales.is_empty() {
            return Ok(0);
        }
        let total = sales.len() as f64;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for sale in &sales {
            if let Some(key) = sale.product_key.as_deref() {
                *counts.entry(key.to_string()).or_insert(0) += 1;
            }
        }

        let product_repo = SqliteProductRepository::new(self.store.pool().clone(), self.ctx.clone());
        let products = product_repo.list().await?;
        let mut updated = 0usize;
        for product in &products {
            let score = counts.get(&product.product_key).copied().unwrap_or(0) as f64 / total;
            product_repo
                .set_popularity(&product.product_key, score)
                .await?;
            updated += 1;
        }

        info!(tenant_id = %self.ctx.tenant_id, updated, "product popularity refreshed");
        Ok(updated)
    }
}
