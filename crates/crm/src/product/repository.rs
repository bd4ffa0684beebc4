use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use validator::Validate;

use crate::error::{CrmError, Result};
use crate::product::model::{CreateAliasRequest, CreateProductRequest, Product, ProductAlias};
use cuvee_core::text::normalize_label;
use cuvee_core::TenantContext;

/// Product and alias data access, scoped to one tenant.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn create(&self, request: &CreateProductRequest) -> Result<Product>;
    async fn get_by_key(&self, product_key: &str) -> Result<Option<Product>>;
    async fn list(&self) -> Result<Vec<Product>>;
    /// Active, non-archived products only.
    async fn list_offerable(&self) -> Result<Vec<Product>>;
    async fn set_popularity(&self, product_key: &str, score: f64) -> Result<()>;

    async fn create_alias(&self, request: &CreateAliasRequest) -> Result<ProductAlias>;
    /// `label_norm -> product_key` for the tenant.
    async fn alias_map(&self) -> Result<HashMap<String, String>>;
}

/// SQLite implementation of [`ProductRepository`].
pub struct SqliteProductRepository {
    pool: SqlitePool,
    ctx: TenantContext,
}

impl SqliteProductRepository {
    pub fn new(pool: SqlitePool, ctx: TenantContext) -> Self {
        Self { pool, ctx }
    }
}

#[async_trait]
impl ProductRepository for SqliteProductRepository {
    async fn create(&self, request: &CreateProductRequest) -> Result<Product> {
        request.validate().map_err(|e| CrmError::Validation {
            field: "request".to_string(),
            message: e.to_string(),
        })?;

        let axes = request.aroma_axes.unwrap_or_default();
        let has_axes = request.aroma_axes.is_some();
        let axis = |idx: usize| -> Option<f64> { has_axes.then(|| axes[idx]) };

        let outcome = sqlx::query(
            r#"
            INSERT INTO products (
                tenant_id, product_key, name, family_crm, sub_family, cepage,
                sucrosite_niveau, price_ttc, margin, premium_tier, price_band,
                aroma_fruit, aroma_floral, aroma_spice, aroma_mineral,
                aroma_acidity, aroma_body, aroma_tannin, season_tags
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                    ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(&request.product_key)
        .bind(&request.name)
        .bind(&request.family_crm)
        .bind(&request.sub_family)
        .bind(&request.cepage)
        .bind(&request.sucrosite_niveau)
        .bind(request.price_ttc)
        .bind(request.margin)
        .bind(&request.premium_tier)
        .bind(&request.price_band)
        .bind(axis(0))
        .bind(axis(1))
        .bind(axis(2))
        .bind(axis(3))
        .bind(axis(4))
        .bind(axis(5))
        .bind(axis(6))
        .bind(&request.season_tags)
        .execute(&self.pool)
        .await
        .map_err(CrmError::Database);

        match outcome {
            Ok(_) => {}
            Err(err) if err.is_unique_violation() => {
                return Err(CrmError::DuplicateProductKey {
                    key: request.product_key.clone(),
                })
            }
            Err(err) => return Err(err),
        }

        self.get_by_key(&request.product_key)
            .await?
            .ok_or_else(|| CrmError::ProductNotFound {
                key: request.product_key.clone(),
            })
    }

    async fn get_by_key(&self, product_key: &str) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE tenant_id = ?1 AND product_key = ?2",
        )
        .bind(self.ctx.tenant_id)
        .bind(product_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    async fn list(&self) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE tenant_id = ?1 ORDER BY product_key",
        )
        .bind(self.ctx.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn list_offerable(&self) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT * FROM products
            WHERE tenant_id = ?1 AND is_active = 1 AND is_archived = 0
            ORDER BY product_key
            "#,
        )
        .bind(self.ctx.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn set_popularity(&self, product_key: &str, score: f64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products SET global_popularity_score = ?3
            WHERE tenant_id = ?1 AND product_key = ?2
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(product_key)
        .bind(score.clamp(0.0, 1.0))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CrmError::ProductNotFound {
                key: product_key.to_string(),
            });
        }
        Ok(())
    }

    async fn create_alias(&self, request: &CreateAliasRequest) -> Result<ProductAlias> {
        request.validate().map_err(|e| CrmError::Validation {
            field: "request".to_string(),
            message: e.to_string(),
        })?;

        let label_norm = normalize_label(&request.label);
        let now = Utc::now();

        let outcome = sqlx::query(
            r#"
            INSERT INTO product_alias (
                tenant_id, label_raw, label_norm, product_key,
                confidence, source, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(&request.label)
        .bind(&label_norm)
        .bind(&request.product_key)
        .bind(request.confidence)
        .bind(&request.source)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(CrmError::Database);

        match outcome {
            Ok(_) => {}
            Err(err) if err.is_unique_violation() => {
                return Err(CrmError::DuplicateAliasLabel { label: label_norm })
            }
            Err(err) => return Err(err),
        }

        let alias = sqlx::query_as::<_, ProductAlias>(
            "SELECT * FROM product_alias WHERE tenant_id = ?1 AND label_norm = ?2",
        )
        .bind(self.ctx.tenant_id)
        .bind(&label_norm)
        .fetch_one(&self.pool)
        .await?;
        Ok(alias)
    }

    async fn alias_map(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT label_norm, product_key FROM product_alias WHERE tenant_id = ?1",
        )
        .bind(self.ctx.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}
