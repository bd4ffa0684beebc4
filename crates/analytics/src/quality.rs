//! Data-quality audit.
//!
//! Distinct from the run-level gating audit: this scan journals the overall
//! health of a tenant's data into `audit_logs` and never blocks anything.
//! Same score formula as the gating engine, different rule set.

use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use tracing::info;

use cuvee_core::{Store, TenantContext};
use cuvee_crm::{
    ClientRepository, ProductRepository, Result, SaleRepository, SqliteClientRepository,
    SqliteProductRepository,
};

/// Result of one quality scan; also persisted to `audit_logs`.
#[derive(Debug, Clone)]
pub struct QualityAudit {
    pub errors: i64,
    pub warnings: i64,
    pub score: f64,
    pub details: Vec<String>,
}

impl QualityAudit {
    pub fn passed(&self) -> bool {
        self.errors == 0 && self.score >= 80.0
    }
}

pub struct QualityAuditService {
    store: Store,
    ctx: TenantContext,
}

impl QualityAuditService {
    pub fn new(store: Store, ctx: TenantContext) -> Self {
        Self { store, ctx }
    }

    /// Runs the full rule set and journals the result. `today` is
    /// injectable for tests.
    pub async fn run(&self, today: NaiveDate) -> Result<QualityAudit> {
        let clients = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let products = SqliteProductRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let sales = SaleRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;

        let mut errors = 0i64;
        let mut warnings = 0i64;
        let mut details: Vec<String> = Vec::new();

        let product_keys: HashSet<&str> =
            products.iter().map(|p| p.product_key.as_str()).collect();
        let client_codes: HashSet<&str> = clients.iter().map(|c| c.client_code.as_str()).collect();

        let mut email_owners: HashMap<String, Vec<&str>> = HashMap::new();
        for client in &clients {
            if let Some(email) = client.email.as_deref().filter(|e| !e.is_empty()) {
                email_owners
                    .entry(email.to_lowercase())
                    .or_default()
                    .push(&client.client_code);
            }
        }

        for client in &clients {
            match client.last_purchase_date {
                Some(date) => {
                    let days = (today - date).num_days();
                    if days > 365 {
                        errors += 1;
                        details.push(format!(
                            "SILENCE_WINDOW: client {} inactive for more than 365 days",
                            client.client_code
                        ));
                    }
                    if days > 180 {
                        warnings += 1;
                        details.push(format!(
                            "CHURN_WARNING: client {} has not purchased in over 180 days",
                            client.client_code
                        ));
                    }
                }
                None => {
                    errors += 1;
                    details.push(format!(
                        "NO_PURCHASE_DATA: client {} has no known purchase date",
                        client.client_code
                    ));
                }
            }
            if client.email.as_deref().unwrap_or("").is_empty() {
                errors += 1;
                details.push(format!(
                    "MISSING_EMAIL: client {} has no email address",
                    client.client_code
                ));
            }
            if client.recency.is_none() || client.frequency.is_none() || client.monetary.is_none() {
                warnings += 1;
                details.push(format!(
                    "INCOMPLETE_RFM: client {} is missing RFM components",
                    client.client_code
                ));
            }
        }

        for (email, owners) in &email_owners {
            if owners.len() > 1 {
                warnings += 1;
                details.push(format!(
                    "DUPLICATE_EMAIL: {email} is shared by clients {}",
                    owners.join(", ")
                ));
            }
        }

        // Duplicate (document, product) pairs inside the last 30 days.
        let cutoff = today - chrono::Duration::days(30);
        let mut recent_pairs: HashMap<(String, String), u64> = HashMap::new();
        for sale in sales.iter().filter(|s| s.sale_date.map(|d| d >= cutoff).unwrap_or(false)) {
            let key = (
                sale.document_id.clone(),
                sale.product_key.clone().unwrap_or_default(),
            );
            *recent_pairs.entry(key).or_insert(0) += 1;
        }
        for ((document, product), count) in &recent_pairs {
            if *count > 1 {
                errors += 1;
                details.push(format!(
                    "RECENT_DUPLICATE: {document} {product} appears {count} times within 30 days"
                ));
            }
        }

        let mut distinct_products: HashMap<&str, HashSet<&str>> = HashMap::new();
        for sale in &sales {
            if let Some(key) = sale.product_key.as_deref() {
                distinct_products
                    .entry(sale.client_code.as_str())
                    .or_default()
                    .insert(key);
            }
        }
        for client in &clients {
            let count = distinct_products
                .get(client.client_code.as_str())
                .map(HashSet::len)
                .unwrap_or(0);
            if count == 1 {
                warnings += 1;
                details.push(format!(
                    "LOW_DIVERSITY: client {} has only purchased one distinct product",
                    client.client_code
                ));
            }
        }

        for sale in &sales {
            let bad_quantity = sale.quantity.map(|q| q <= 0.0).unwrap_or(false);
            let bad_amount = sale.amount.map(|a| a <= 0.0).unwrap_or(false);
            if bad_quantity || bad_amount {
                errors += 1;
                details.push(format!(
                    "INVALID_SALE_VALUE: sale {} has a non-positive quantity or amount",
                    sale.document_id
                ));
            }
            if sale.quantity == Some(0.0) {
                errors += 1;
                details.push(format!(
                    "ZERO_QUANTITY: sale {} has zero quantity",
                    sale.document_id
                ));
            }
            if let Some(key) = sale.product_key.as_deref() {
                if !product_keys.contains(key) {
                    errors += 1;
                    details.push(format!(
                        "UNKNOWN_PRODUCT: sale {} references unknown product {key}",
                        sale.document_id
                    ));
                }
            }
            if !client_codes.contains(sale.client_code.as_str()) {
                errors += 1;
                details.push(format!(
                    "UNKNOWN_CLIENT: sale {} references unknown client {}",
                    sale.document_id, sale.client_code
                ));
            }
        }

        for product in &products {
            if let Some(price) = product.price_ttc {
                if price <= 0.0 || price > 1000.0 {
                    warnings += 1;
                    details.push(format!(
                        "UNREALISTIC_PRICE: product {} has an unusual price ({price})",
                        product.product_key
                    ));
                }
            }
            if product.margin.map(|m| m < 0.0).unwrap_or(false) {
                errors += 1;
                details.push(format!(
                    "NEGATIVE_MARGIN: product {} has a negative margin",
                    product.product_key
                ));
            }
            if product
                .family_crm
                .as_deref()
                .map(|f| f.trim().is_empty())
                .unwrap_or(true)
            {
                warnings += 1;
                details.push(format!(
                    "MISSING_FAMILY: product {} has no CRM family",
                    product.product_key
                ));
            }
        }

        let score = (100.0 - 40.0 * errors as f64 - 10.0 * warnings as f64).max(0.0);
        let audit = QualityAudit {
            errors,
            warnings,
            score,
            details,
        };

        sqlx::query(
            r#"
            INSERT INTO audit_logs (tenant_id, executed_at, errors, warnings, score, details)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(Utc::now())
        .bind(audit.errors)
        .bind(audit.warnings)
        .bind(audit.score)
        .bind(audit.details.join("\n"))
        .execute(self.store.pool())
        .await
        .map_err(cuvee_crm::CrmError::Database)?;

        info!(
            tenant_id = %self.ctx.tenant_id,
            errors = audit.errors,
            warnings = audit.warnings,
            score = audit.score,
            "data-quality audit recorded"
        );
        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuvee_core::TenantId;
    use cuvee_crm::{CreateClientRequest, CreateProductRequest, NewSale};

    #[tokio::test]
    async fn clean_tenant_passes_dirty_tenant_accumulates_issues() {
        let store = Store::in_memory().await.unwrap();
        let ctx = TenantContext::new(TenantId(1));
        let today = Utc::now().date_naive();

        let clients = SqliteClientRepository::new(store.pool().clone(), ctx.clone());
        clients
            .create(&CreateClientRequest {
                client_code: "C1".to_string(),
                email: Some("c1@example.com".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        // Recent purchase metadata so the freshness rules stay quiet.
        sqlx::query(
            r#"
            UPDATE clients SET last_purchase_date = ?1, recency = 5, frequency = 2, monetary = 40
            WHERE client_code = 'C1'
            "#,
        )
        .bind(today - chrono::Duration::days(5))
        .execute(store.pool())
        .await
        .unwrap();

        SqliteProductRepository::new(store.pool().clone(), ctx.clone())
            .create(&CreateProductRequest {
                product_key: "P1".to_string(),
                name: "Riesling".to_string(),
                family_crm: Some("Blanc".to_string()),
                price_ttc: Some(12.0),
                ..Default::default()
            })
            .await
            .unwrap();
        SqliteProductRepository::new(store.pool().clone(), ctx.clone())
            .create(&CreateProductRequest {
                product_key: "P2".to_string(),
                name: "Sylvaner".to_string(),
                family_crm: Some("Blanc".to_string()),
                price_ttc: Some(9.0),
                ..Default::default()
            })
            .await
            .unwrap();
        let sales = SaleRepository::new(store.pool().clone(), ctx.clone());
        for (doc, key) in [("I1", "P1"), ("I2", "P2")] {
            sales
                .insert(&NewSale {
                    document_id: doc.to_string(),
                    product_key: Some(key.to_string()),
                    client_code: "C1".to_string(),
                    quantity: Some(1.0),
                    amount: Some(12.0),
                    sale_date: Some(today - chrono::Duration::days(5)),
                })
                .await
                .unwrap();
        }

        let service = QualityAuditService::new(store.clone(), ctx.clone());
        let clean = service.run(today).await.unwrap();
        assert_eq!(clean.errors, 0, "unexpected: {:?}", clean.details);
        assert!(clean.passed());

        // Now poison the data: client with no email and a sale pointing at
        // nothing.
        clients
            .create(&CreateClientRequest {
                client_code: "C2".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        sales
            .insert(&NewSale {
                document_id: "I3".to_string(),
                product_key: Some("GHOST".to_string()),
                client_code: "NOBODY".to_string(),
                quantity: Some(0.0),
                amount: Some(5.0),
                sale_date: Some(today),
            })
            .await
            .unwrap();

        let dirty = service.run(today).await.unwrap();
        assert!(dirty.errors >= 4);
        assert!(!dirty.passed());
        assert!(dirty.details.iter().any(|d| d.starts_with("MISSING_EMAIL")));
        assert!(dirty.details.iter().any(|d| d.starts_with("UNKNOWN_PRODUCT")));
        assert!(dirty.details.iter().any(|d| d.starts_with("UNKNOWN_CLIENT")));
        assert!(dirty.details.iter().any(|d| d.starts_with("ZERO_QUANTITY")));

        let logged: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_logs WHERE tenant_id = 1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(logged.0, 2);
    }
}
