//! Marketing dispatch, gated by the run summary.
//!
//! Dry-run first: the default posture performs no external call and records
//! one `ContactEvent{status: dry_run}` per targeted client, which is enough
//! for the silence-window rule to see the touch. Live sends go through the
//! `DispatchClient` trait; the crate only ships a recording no-op client,
//! provider integration lives with the caller.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use cuvee_core::{RunId, Store, TenantContext};
use cuvee_crm::{
    contact::{STATUS_DELIVERED, STATUS_DRY_RUN},
    ClientRepository, ContactEventRepository, NewContactEvent, RunRepository,
    SqliteClientRepository,
};

/// What a live dispatch would send.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchPayload {
    pub run_id: String,
    pub batch_id: String,
    pub contacts: Vec<DispatchContact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchContact {
    pub customer_code: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReceipt {
    pub run_id: String,
    pub batch_id: String,
    pub dry_run: bool,
    pub count: usize,
    /// First few contacts for operator inspection.
    pub preview: Vec<DispatchContact>,
}

/// Outbound transport seam. Implementations must not be invoked in dry-run
/// mode.
#[async_trait]
pub trait DispatchClient: Send + Sync {
    async fn send_batch(&self, payload: &DispatchPayload) -> Result<()>;
}

/// No-op client that records payloads; the default live transport until a
/// provider integration is wired in by the caller.
#[derive(Default)]
pub struct RecordingDispatchClient {
    pub calls: Mutex<Vec<DispatchPayload>>,
}

#[async_trait]
impl DispatchClient for RecordingDispatchClient {
    async fn send_batch(&self, payload: &DispatchPayload) -> Result<()> {
        self.calls
            .lock()
            .expect("dispatch call log poisoned")
            .push(payload.clone());
        Ok(())
    }
}

pub struct DispatchService {
    store: Store,
    ctx: TenantContext,
    dry_run_default: bool,
    min_batch_size: usize,
    max_batch_size: usize,
}

impl DispatchService {
    pub fn new(store: Store, ctx: TenantContext) -> Self {
        Self {
            store,
            ctx,
            dry_run_default: true,
            min_batch_size: 200,
            max_batch_size: 300,
        }
    }

    pub fn with_limits(
        store: Store,
        ctx: TenantContext,
        dry_run_default: bool,
        min_batch_size: usize,
        max_batch_size: usize,
    ) -> Self {
        Self {
            store,
            ctx,
            dry_run_default,
            min_batch_size,
            max_batch_size,
        }
    }

    /// Dispatches (or simulates) one batch for a run. Refuses when the
    /// run's `gate_export` is false, the batch size is out of bounds, or no
    /// client is eligible.
    pub async fn send_batch(
        &self,
        run_id: &RunId,
        batch_size: usize,
        dry_run: Option<bool>,
        client: Option<&dyn DispatchClient>,
    ) -> Result<DispatchReceipt> {
        if batch_size < self.min_batch_size || batch_size > self.max_batch_size {
            return Err(EngineError::InvalidBatchSize {
                size: batch_size,
                min: self.min_batch_size,
                max: self.max_batch_size,
            });
        }
        let dry_run = dry_run.unwrap_or(self.dry_run_default);

        let run_repo = RunRepository::new(self.store.pool().clone(), self.ctx.clone());
        let summary = run_repo
            .summary(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        let stats = summary.stats()?;
        if !stats.gate_export {
            return Err(EngineError::GateClosed {
                run_id: run_id.to_string(),
                reason: format!(
                    "n_errors={} audit_score={}",
                    stats.n_errors, stats.audit_score
                ),
            });
        }

        let eligible: Vec<String> = run_repo
            .next_actions(run_id)
            .await?
            .into_iter()
            .filter(|action| action.eligible)
            .map(|action| action.customer_code)
            .take(batch_size)
            .collect();
        if eligible.is_empty() {
            return Err(EngineError::NoEligibleClients {
                run_id: run_id.to_string(),
            });
        }

        let client_repo = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone());
        let mut contacts = Vec::new();
        let mut client_ids = Vec::new();
        for code in &eligible {
            let Some(row) = client_repo.get_by_code(code).await? else {
                continue;
            };
            let Some(email) = row.email.clone().filter(|e| !e.is_empty()) else {
                continue;
            };
            client_ids.push(row.id);
            contacts.push(DispatchContact {
                customer_code: row.client_code,
                email,
                name: row.name,
            });
        }

        let batch_id = Uuid::new_v4().simple().to_string();
        let payload = DispatchPayload {
            run_id: run_id.to_string(),
            batch_id: batch_id.clone(),
            contacts: contacts.clone(),
        };

        if !dry_run {
            if let Some(transport) = client {
                transport.send_batch(&payload).await?;
            }
        }

        // Every targeted client gets a contact event; dry runs are the
        // evidence the silence-window rule keys on.
        let status = if dry_run { STATUS_DRY_RUN } else { STATUS_DELIVERED };
        let events = ContactEventRepository::new(self.store.pool().clone(), self.ctx.clone());
        let now = Utc::now();
        for client_id in &client_ids {
            events
                .record(&NewContactEvent {
                    client_id: *client_id,
                    contact_date: now,
                    channel: Some("email".to_string()),
                    status: Some(status.to_string()),
                    campaign_id: None,
                })
                .await?;
        }

        info!(
            tenant_id = %self.ctx.tenant_id,
            run_id = %run_id,
            batch_id = %batch_id,
            dry_run,
            count = contacts.len(),
            "dispatch batch processed"
        );
        let preview: Vec<DispatchContact> = contacts.iter().take(5).cloned().collect();
        Ok(DispatchReceipt {
            run_id: run_id.to_string(),
            batch_id,
            dry_run,
            count: contacts.len(),
            preview,
        })
    }

    /// Contact-sync preview: clients with an email address, capped sample.
    pub async fn sync_contacts_preview(&self) -> Result<(usize, Vec<DispatchContact>)> {
        let client_repo = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone());
        let contacts: Vec<DispatchContact> = client_repo
            .list()
            .await?
            .into_iter()
            .filter_map(|c| {
                c.email.clone().filter(|e| !e.is_empty()).map(|email| DispatchContact {
                    customer_code: c.client_code,
                    email,
                    name: c.name,
                })
            })
            .collect();
        let preview = contacts.iter().take(5).cloned().collect();
        Ok((contacts.len(), preview))
    }
}
