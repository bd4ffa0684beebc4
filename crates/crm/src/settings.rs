use sqlx::SqlitePool;

use crate::error::Result;
use cuvee_core::TenantContext;

/// Per-tenant configuration overrides, keyed strings with serialized values.
/// The engine reads `scoring_config` from here to override its defaults.
pub struct SettingsRepository {
    pool: SqlitePool,
    ctx: TenantContext,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool, ctx: TenantContext) -> Self {
        Self { pool, ctx }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT value FROM config_settings WHERE tenant_id = ?1 AND key = ?2",
        )
        .bind(self.ctx.tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(value,)| value))
    }

    pub async fn set(&self, key: &str, value: &str, description: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config_settings (tenant_id, key, value, description)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (tenant_id, key)
            DO UPDATE SET value = excluded.value,
                          description = COALESCE(excluded.description, description)
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(key)
        .bind(value)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuvee_core::{Store, TenantId};

    #[tokio::test]
    async fn set_then_get_roundtrips_and_updates() {
        let store = Store::in_memory().await.unwrap();
        let repo = SettingsRepository::new(store.pool().clone(), TenantContext::new(TenantId(1)));

        assert!(repo.get("scoring_config").await.unwrap().is_none());
        repo.set("scoring_config", "{}", Some("engine weights"))
            .await
            .unwrap();
        repo.set("scoring_config", "{\"v\":2}", None).await.unwrap();
        assert_eq!(
            repo.get("scoring_config").await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );
    }
}
