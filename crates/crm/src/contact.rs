use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;
use cuvee_core::{TenantContext, TenantId};

/// Marketing contact history. Drives the silence-window and opt-out audit
/// rules, and records dry-run dispatches.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactEvent {
    pub id: i64,
    pub tenant_id: TenantId,
    pub client_id: i64,
    pub contact_date: DateTime<Utc>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub campaign_id: Option<i64>,
}

/// Contact statuses with audit significance.
pub const STATUS_DELIVERED: &str = "delivered";
pub const STATUS_OPEN: &str = "open";
pub const STATUS_CLICK: &str = "click";
pub const STATUS_BOUNCE: &str = "bounce";
pub const STATUS_UNSUBSCRIBE: &str = "unsubscribe";
pub const STATUS_DRY_RUN: &str = "dry_run";

#[derive(Debug, Clone)]
pub struct NewContactEvent {
    pub client_id: i64,
    pub contact_date: DateTime<Utc>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub campaign_id: Option<i64>,
}

pub struct ContactEventRepository {
    pool: SqlitePool,
    ctx: TenantContext,
}

impl ContactEventRepository {
    pub fn new(pool: SqlitePool, ctx: TenantContext) -> Self {
        Self { pool, ctx }
    }

    pub async fn record(&self, event: &NewContactEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contact_events (tenant_id, client_id, contact_date,
                                        channel, status, campaign_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(event.client_id)
        .bind(event.contact_date)
        .bind(&event.channel)
        .bind(&event.status)
        .bind(event.campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn events_for_client(&self, client_id: i64) -> Result<Vec<ContactEvent>> {
        let events = sqlx::query_as::<_, ContactEvent>(
            r#"
            SELECT * FROM contact_events
            WHERE tenant_id = ?1 AND client_id = ?2
            ORDER BY contact_date DESC
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuvee_core::Store;

    #[tokio::test]
    async fn events_are_recorded_and_listed_newest_first() {
        let store = Store::in_memory().await.unwrap();
        let repo =
            ContactEventRepository::new(store.pool().clone(), TenantContext::new(TenantId(1)));

        let older = Utc::now() - chrono::Duration::days(10);
        let newer = Utc::now() - chrono::Duration::days(2);
        for (date, status) in [(older, STATUS_DELIVERED), (newer, STATUS_CLICK)] {
            repo.record(&NewContactEvent {
                client_id: 1,
                contact_date: date,
                channel: Some("email".to_string()),
                status: Some(status.to_string()),
                campaign_id: None,
            })
            .await
            .unwrap();
        }

        let events = repo.events_for_client(1).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status.as_deref(), Some(STATUS_CLICK));
    }
}
