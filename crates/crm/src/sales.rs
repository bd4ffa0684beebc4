use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;
use cuvee_core::{TenantContext, TenantId};

/// A sales line. Natural key: `(tenant_id, document_id, product_key,
/// client_code)`. Amounts are in the tenant's single currency; there is no
/// currency column on purpose.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sale {
    pub id: i64,
    pub tenant_id: TenantId,
    pub document_id: String,
    /// `None` until the loader resolves the product label.
    pub product_key: Option<String>,
    pub client_code: String,
    pub quantity: Option<f64>,
    pub amount: Option<f64>,
    pub sale_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSale {
    pub document_id: String,
    pub product_key: Option<String>,
    pub client_code: String,
    pub quantity: Option<f64>,
    pub amount: Option<f64>,
    pub sale_date: Option<NaiveDate>,
}

pub struct SaleRepository {
    pool: SqlitePool,
    ctx: TenantContext,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool, ctx: TenantContext) -> Self {
        Self { pool, ctx }
    }

    /// Upsert by natural key, keep-last semantics.
    pub async fn insert(&self, sale: &NewSale) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sales (tenant_id, document_id, product_key, client_code,
                               quantity, amount, sale_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (tenant_id, document_id, product_key, client_code)
            DO UPDATE SET quantity = excluded.quantity,
                          amount = excluded.amount,
                          sale_date = excluded.sale_date
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(&sale.document_id)
        .bind(&sale.product_key)
        .bind(&sale.client_code)
        .bind(sale.quantity)
        .bind(sale.amount)
        .bind(sale.sale_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Sale>> {
        let sales = sqlx::query_as::<_, Sale>(
            "SELECT * FROM sales WHERE tenant_id = ?1 ORDER BY id",
        )
        .bind(self.ctx.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sales)
    }

    pub async fn purchases_for_client(&self, client_code: &str) -> Result<Vec<Sale>> {
        let sales = sqlx::query_as::<_, Sale>(
            r#"
            SELECT * FROM sales
            WHERE tenant_id = ?1 AND client_code = ?2
            ORDER BY sale_date, id
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(client_code)
        .fetch_all(&self.pool)
        .await?;
        Ok(sales)
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sales WHERE tenant_id = ?1")
            .bind(self.ctx.tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuvee_core::Store;

    #[tokio::test]
    async fn upsert_keeps_last_row_for_natural_key() {
        let store = Store::in_memory().await.unwrap();
        let repo = SaleRepository::new(store.pool().clone(), TenantContext::new(TenantId(1)));

        let mut sale = NewSale {
            document_id: "INV-1".to_string(),
            product_key: Some("P001".to_string()),
            client_code: "C1".to_string(),
            quantity: Some(1.0),
            amount: Some(10.0),
            sale_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        };
        repo.insert(&sale).await.unwrap();

        sale.amount = Some(12.0);
        repo.insert(&sale).await.unwrap();

        let rows = repo.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, Some(12.0));
    }
}
