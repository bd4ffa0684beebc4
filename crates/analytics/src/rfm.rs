//! RFM computation per tenant.
//!
//! Reference date is the most recent sale in the tenant. Recency is scored
//! inversely (fewer days since purchase scores higher), frequency and
//! monetary positively, each into per-tenant quintiles 1..5, composed as
//! `rfm_score = R*100 + F*10 + M`.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::quantile::{score_inverse, score_positive};
use cuvee_crm::{Client, ClientRepository, Result, RfmUpdate, SaleRepository, SqliteClientRepository};
use cuvee_core::{Store, TenantContext};

#[derive(Debug, Default)]
struct ClientSales {
    last_purchase_date: Option<NaiveDate>,
    total_spent: f64,
    documents: HashSet<String>,
    row_count: i64,
}

pub struct RfmService {
    store: Store,
    ctx: TenantContext,
}

impl RfmService {
    pub fn new(store: Store, ctx: TenantContext) -> Self {
        Self { store, ctx }
    }

    /// Recomputes RFM for every client of the tenant that has sales.
    /// Returns the number of clients updated. Idempotent.
    pub async fn recompute(&self) -> Result<usize> {
        let _guard = self.store.tenant_lock(self.ctx.tenant_id).await;
        let sales = SaleRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        if sales.is_empty() {
            return Ok(0);
        }

        let mut metrics: BTreeMap<String, ClientSales> = BTreeMap::new();
        for sale in &sales {
            let entry = metrics.entry(sale.client_code.clone()).or_default();
            if let Some(date) = sale.sale_date {
                if entry.last_purchase_date.map(|d| date > d).unwrap_or(true) {
                    entry.last_purchase_date = Some(date);
                }
            }
            // Monetary falls back to quantity when the amount is missing.
            entry.total_spent += sale.amount.or(sale.quantity).unwrap_or(0.0);
            if !sale.document_id.is_empty() {
                entry.documents.insert(sale.document_id.clone());
            }
            entry.row_count += 1;
        }

        let Some(reference_date) = metrics
            .values()
            .filter_map(|m| m.last_purchase_date)
            .max()
        else {
            return Ok(0);
        };

        let client_codes: Vec<String> = metrics.keys().cloned().collect();
        let mut recency_list = Vec::with_capacity(client_codes.len());
        let mut frequency_list = Vec::with_capacity(client_codes.len());
        let mut monetary_list = Vec::with_capacity(client_codes.len());
        for code in &client_codes {
            let data = &metrics[code];
            recency_list.push(
                data.last_purchase_date
                    .map(|d| (reference_date - d).num_days() as f64),
            );
            frequency_list.push(Some(total_orders(data) as f64));
            monetary_list.push(Some(data.total_spent));
        }

        let r_scores = score_inverse(&recency_list);
        let f_scores = score_positive(&frequency_list);
        let m_scores = score_positive(&monetary_list);

        let repo = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone());
        let mut updated = 0usize;
        for (idx, code) in client_codes.iter().enumerate() {
            let data = &metrics[code];
            let orders = total_orders(data);
            let (r, f, m) = (r_scores[idx], f_scores[idx], m_scores[idx]);
            let update = RfmUpdate {
                last_purchase_date: data.last_purchase_date,
                total_spent: data.total_spent,
                total_orders: orders,
                average_order_value: if orders > 0 {
                    data.total_spent / orders as f64
                } else {
                    0.0
                },
                recency: recency_list[idx],
                frequency: frequency_list[idx],
                monetary: monetary_list[idx],
                rfm_score: r * 100 + f * 10 + m,
                rfm_segment: Some(segment_for(r, f, m).to_string()),
            };
            match repo.update_rfm(code, &update).await {
                Ok(()) => updated += 1,
                // Sales can reference codes that never made it into the
                // clients table; they simply have no row to update.
                Err(cuvee_crm::CrmError::ClientNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        info!(tenant_id = %self.ctx.tenant_id, updated, "rfm recompute finished");
        Ok(updated)
    }

    /// Recomputes aggregates for a single client using fixed scoring bands.
    /// Used after a manual sale entry when a full tenant recompute would be
    /// wasteful.
    pub async fn recompute_client(
        &self,
        client_code: &str,
        today: NaiveDate,
    ) -> Result<Client> {
        let repo = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone());
        repo.get_by_code(client_code)
            .await?
            .ok_or_else(|| cuvee_crm::CrmError::ClientNotFound {
                code: client_code.to_string(),
            })?;

        let purchases = SaleRepository::new(self.store.pool().clone(), self.ctx.clone())
            .purchases_for_client(client_code)
            .await?;

        let mut data = ClientSales::default();
        for sale in &purchases {
            if let Some(date) = sale.sale_date {
                if data.last_purchase_date.map(|d| date > d).unwrap_or(true) {
                    data.last_purchase_date = Some(date);
                }
            }
            data.total_spent += sale.amount.or(sale.quantity).unwrap_or(0.0);
            if !sale.document_id.is_empty() {
                data.documents.insert(sale.document_id.clone());
            }
            data.row_count += 1;
        }

        let orders = total_orders(&data);
        let recency = data
            .last_purchase_date
            .map(|d| (today - d).num_days() as f64);
        let r = banded_recency_score(recency);
        let f = banded_frequency_score(orders);
        let m = banded_monetary_score(data.total_spent);

        let update = RfmUpdate {
            last_purchase_date: data.last_purchase_date,
            total_spent: data.total_spent,
            total_orders: orders,
            average_order_value: if orders > 0 {
                data.total_spent / orders as f64
            } else {
                0.0
            },
            recency,
            frequency: Some(orders as f64),
            monetary: Some(data.total_spent),
            rfm_score: r * 100 + f * 10 + m,
            rfm_segment: Some(segment_for(r, f, m).to_string()),
        };
        repo.update_rfm(client_code, &update).await?;
        repo.get_by_code(client_code)
            .await?
            .ok_or_else(|| cuvee_crm::CrmError::ClientNotFound {
                code: client_code.to_string(),
            })
    }
}

fn total_orders(data: &ClientSales) -> i64 {
    if data.documents.is_empty() {
        data.row_count
    } else {
        data.documents.len() as i64
    }
}

/// Segment table over the three quintile scores.
fn segment_for(r: i64, f: i64, m: i64) -> &'static str {
    if r >= 4 && f >= 4 && m >= 4 {
        "Champions"
    } else if f >= 4 && r >= 3 {
        "Loyal"
    } else if m >= 4 && f >= 3 {
        "Big Spenders"
    } else if r >= 4 && f <= 2 {
        "Recent"
    } else if r >= 3 && f >= 2 && m >= 2 {
        "Promising"
    } else if r <= 2 && f <= 2 {
        "At Risk"
    } else {
        "Others"
    }
}

fn banded_recency_score(recency_days: Option<f64>) -> i64 {
    match recency_days {
        None => 1,
        Some(d) if d <= 30.0 => 5,
        Some(d) if d <= 90.0 => 4,
        Some(d) if d <= 180.0 => 3,
        Some(d) if d <= 365.0 => 2,
        Some(_) => 1,
    }
}

fn banded_frequency_score(total_orders: i64) -> i64 {
    match total_orders {
        n if n >= 12 => 5,
        n if n >= 6 => 4,
        n if n >= 3 => 3,
        n if n >= 2 => 2,
        _ => 1,
    }
}

fn banded_monetary_score(total_spent: f64) -> i64 {
    match total_spent {
        s if s >= 2000.0 => 5,
        s if s >= 1000.0 => 4,
        s if s >= 500.0 => 3,
        s if s >= 200.0 => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cuvee_crm::{CreateClientRequest, NewSale};
    use cuvee_core::TenantId;

    async fn seed_store() -> (Store, TenantContext) {
        let store = Store::in_memory().await.unwrap();
        (store, TenantContext::new(TenantId(1)))
    }

    async fn add_client(store: &Store, ctx: &TenantContext, code: &str) {
        SqliteClientRepository::new(store.pool().clone(), ctx.clone())
            .create(&CreateClientRequest {
                client_code: code.to_string(),
                email: Some(format!("{code}@example.com")),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn add_sale(
        store: &Store,
        ctx: &TenantContext,
        doc: &str,
        code: &str,
        amount: f64,
        date: NaiveDate,
    ) {
        SaleRepository::new(store.pool().clone(), ctx.clone())
            .insert(&NewSale {
                document_id: doc.to_string(),
                product_key: Some("P1".to_string()),
                client_code: code.to_string(),
                quantity: Some(1.0),
                amount: Some(amount),
                sale_date: Some(date),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn single_sale_today_composes_511() {
        let (store, ctx) = seed_store().await;
        add_client(&store, &ctx, "C1").await;
        let today = Utc::now().date_naive();
        add_sale(&store, &ctx, "INV-1", "C1", 100.0, today).await;

        let service = RfmService::new(store.clone(), ctx.clone());
        let updated = service.recompute().await.unwrap();
        assert_eq!(updated, 1);

        let client = SqliteClientRepository::new(store.pool().clone(), ctx)
            .get_by_code("C1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.total_spent, 100.0);
        assert_eq!(client.total_orders, 1);
        assert_eq!(client.average_order_value, 100.0);
        assert_eq!(client.rfm_score, 511);
        assert_eq!(client.rfm_segment.as_deref(), Some("Recent"));
    }

    #[tokio::test]
    async fn frequency_counts_distinct_documents() {
        let (store, ctx) = seed_store().await;
        add_client(&store, &ctx, "C1").await;
        let today = Utc::now().date_naive();
        // Two lines of the same invoice count as one order.
        add_sale(&store, &ctx, "INV-1", "C1", 40.0, today).await;
        SaleRepository::new(store.pool().clone(), ctx.clone())
            .insert(&NewSale {
                document_id: "INV-1".to_string(),
                product_key: Some("P2".to_string()),
                client_code: "C1".to_string(),
                quantity: Some(1.0),
                amount: Some(60.0),
                sale_date: Some(today),
            })
            .await
            .unwrap();

        RfmService::new(store.clone(), ctx.clone())
            .recompute()
            .await
            .unwrap();

        let client = SqliteClientRepository::new(store.pool().clone(), ctx)
            .get_by_code("C1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.total_orders, 1);
        assert_eq!(client.total_spent, 100.0);
        assert_eq!(client.average_order_value, 100.0);
    }

    #[tokio::test]
    async fn recompute_client_uses_fixed_bands() {
        let (store, ctx) = seed_store().await;
        add_client(&store, &ctx, "C1").await;
        let today = Utc::now().date_naive();
        add_sale(&store, &ctx, "INV-1", "C1", 2500.0, today - chrono::Duration::days(45)).await;

        let client = RfmService::new(store.clone(), ctx.clone())
            .recompute_client("C1", today)
            .await
            .unwrap();
        // 45 days -> R=4, one order -> F=1, 2500 -> M=5.
        assert_eq!(client.rfm_score, 415);
        assert_eq!(client.rfm_segment.as_deref(), Some("Recent"));
    }

    #[test]
    fn segments_follow_the_rule_table() {
        assert_eq!(segment_for(5, 5, 5), "Champions");
        assert_eq!(segment_for(3, 4, 2), "Loyal");
        assert_eq!(segment_for(2, 3, 5), "Big Spenders");
        assert_eq!(segment_for(5, 1, 1), "Recent");
        assert_eq!(segment_for(3, 2, 2), "Promising");
        assert_eq!(segment_for(1, 1, 3), "At Risk");
        assert_eq!(segment_for(3, 3, 1), "Others");
    }
}
