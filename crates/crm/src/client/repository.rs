use async_trait::async_trait;
use sqlx::SqlitePool;
use validator::Validate;

use crate::client::model::{Client, CreateClientRequest, RfmUpdate};
use crate::error::{CrmError, Result};
use cuvee_core::TenantContext;

/// Client data access, always scoped to the repository's tenant.
#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn create(&self, request: &CreateClientRequest) -> Result<Client>;
    async fn get_by_code(&self, client_code: &str) -> Result<Option<Client>>;
    async fn list(&self) -> Result<Vec<Client>>;
    async fn update_rfm(&self, client_code: &str, update: &RfmUpdate) -> Result<()>;
    async fn update_preferences(
        &self,
        client_code: &str,
        preferred_families: Option<&str>,
        budget_band: Option<&str>,
    ) -> Result<()>;
    async fn update_aroma_profile(&self, client_code: &str, aroma_profile: &str) -> Result<()>;
    async fn update_cluster(&self, client_code: &str, cluster: &str) -> Result<()>;
}

/// SQLite implementation of [`ClientRepository`].
pub struct SqliteClientRepository {
    pool: SqlitePool,
    ctx: TenantContext,
}

impl SqliteClientRepository {
    pub fn new(pool: SqlitePool, ctx: TenantContext) -> Self {
        Self { pool, ctx }
    }
}

#[async_trait]
impl ClientRepository for SqliteClientRepository {
    async fn create(&self, request: &CreateClientRequest) -> Result<Client> {
        request.validate().map_err(|e| CrmError::Validation {
            field: "request".to_string(),
            message: e.to_string(),
        })?;

        let outcome = sqlx::query(
            r#"
            INSERT INTO clients (tenant_id, client_code, name, email, email_opt_out)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(&request.client_code)
        .bind(&request.name)
        .bind(&request.email)
        .bind(request.email_opt_out)
        .execute(&self.pool)
        .await
        .map_err(CrmError::Database);

        match outcome {
            Ok(_) => {}
            Err(err) if err.is_unique_violation() => {
                return Err(CrmError::DuplicateClientCode {
                    code: request.client_code.clone(),
                })
            }
            Err(err) => return Err(err),
        }

        self.get_by_code(&request.client_code)
            .await?
            .ok_or_else(|| CrmError::ClientNotFound {
                code: request.client_code.clone(),
            })
    }

    async fn get_by_code(&self, client_code: &str) -> Result<Option<Client>> {
        let client = sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE tenant_id = ?1 AND client_code = ?2",
        )
        .bind(self.ctx.tenant_id)
        .bind(client_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(client)
    }

    async fn list(&self) -> Result<Vec<Client>> {
        let clients = sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE tenant_id = ?1 ORDER BY client_code",
        )
        .bind(self.ctx.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(clients)
    }

    async fn update_rfm(&self, client_code: &str, update: &RfmUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE clients
            SET last_purchase_date = ?3,
                total_spent = ?4,
                total_orders = ?5,
                average_order_value = ?6,
                recency = ?7,
                frequency = ?8,
                monetary = ?9,
                rfm_score = ?10,
                rfm_segment = ?11
            WHERE tenant_id = ?1 AND client_code = ?2
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(client_code)
        .bind(update.last_purchase_date)
        .bind(update.total_spent)
        .bind(update.total_orders)
        .bind(update.average_order_value)
        .bind(update.recency)
        .bind(update.frequency)
        .bind(update.monetary)
        .bind(update.rfm_score)
        .bind(&update.rfm_segment)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CrmError::ClientNotFound {
                code: client_code.to_string(),
            });
        }
        Ok(())
    }

    async fn update_preferences(
        &self,
        client_code: &str,
        preferred_families: Option<&str>,
        budget_band: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE clients
            SET preferred_families = ?3, budget_band = ?4
            WHERE tenant_id = ?1 AND client_code = ?2
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(client_code)
        .bind(preferred_families)
        .bind(budget_band)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CrmError::ClientNotFound {
                code: client_code.to_string(),
            });
        }
        Ok(())
    }

    async fn update_aroma_profile(&self, client_code: &str, aroma_profile: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE clients SET aroma_profile = ?3 WHERE tenant_id = ?1 AND client_code = ?2",
        )
        .bind(self.ctx.tenant_id)
        .bind(client_code)
        .bind(aroma_profile)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CrmError::ClientNotFound {
                code: client_code.to_string(),
            });
        }
        Ok(())
    }

    async fn update_cluster(&self, client_code: &str, cluster: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE clients SET cluster = ?3 WHERE tenant_id = ?1 AND client_code = ?2",
        )
        .bind(self.ctx.tenant_id)
        .bind(client_code)
        .bind(cluster)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CrmError::ClientNotFound {
                code: client_code.to_string(),
            });
        }
        Ok(())
    }
}
