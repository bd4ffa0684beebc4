use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{CrmError, Result};
use cuvee_core::TenantId;

/// Root of isolation. Created by administration; never deleted while
/// dependent rows exist.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct TenantRepository {
    pool: SqlitePool,
}

impl TenantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str, domain: Option<&str>) -> Result<Tenant> {
        let result = sqlx::query("INSERT INTO tenants (name, domain) VALUES (?1, ?2)")
            .bind(name)
            .bind(domain)
            .execute(&self.pool)
            .await?;
        self.get(TenantId(result.last_insert_rowid()))
            .await?
            .ok_or(CrmError::TenantNotFound {
                id: result.last_insert_rowid(),
            })
    }

    /// Idempotently registers a tenant under a fixed id. Used by the
    /// pipeline CLI, which receives tenant ids from the outside.
    pub async fn ensure(&self, tenant_id: TenantId, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO tenants (id, name) VALUES (?1, ?2)")
            .bind(tenant_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, tenant_id: TenantId) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = ?1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }
}
