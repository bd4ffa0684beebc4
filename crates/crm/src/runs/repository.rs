use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{CrmError, Result};
use crate::runs::model::{
    AuditOutput, NewRecoRun, NextActionOutput, RecoOutput, RecoRun, RunArtifacts, RunStatus,
    RunSummary,
};
use cuvee_core::{RunId, TenantContext};

/// Persistence for recommendation runs and their child artifacts.
///
/// A run is written in two steps: `create` inserts the `running` row, and
/// `persist_artifacts` appends every output and flips the status to
/// `completed` inside a single transaction. `fail` is the only other exit:
/// it deletes partial children and marks the run `failed` atomically, so a
/// reader never observes a half-written run.
pub struct RunRepository {
    pool: SqlitePool,
    ctx: TenantContext,
}

impl RunRepository {
    pub fn new(pool: SqlitePool, ctx: TenantContext) -> Self {
        Self { pool, ctx }
    }

    pub async fn create(&self, run: &NewRecoRun) -> Result<RecoRun> {
        let outcome = sqlx::query(
            r#"
            INSERT INTO reco_runs (tenant_id, run_id, started_at, dataset_version,
                                   config_hash, code_version, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running')
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(&run.run_id)
        .bind(Utc::now())
        .bind(&run.dataset_version)
        .bind(&run.config_hash)
        .bind(&run.code_version)
        .execute(&self.pool)
        .await
        .map_err(CrmError::Database);

        match outcome {
            Ok(_) => {}
            Err(err) if err.is_unique_violation() => {
                return Err(CrmError::DuplicateRunId {
                    run_id: run.run_id.to_string(),
                })
            }
            Err(err) => return Err(err),
        }

        self.get(&run.run_id)
            .await?
            .ok_or_else(|| CrmError::RunNotFound {
                run_id: run.run_id.to_string(),
            })
    }

    /// Appends all run outputs and completes the run in one transaction.
    pub async fn persist_artifacts(&self, run_id: &RunId, artifacts: &RunArtifacts) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for output in &artifacts.outputs {
            sqlx::query(
                r#"
                INSERT INTO reco_output (tenant_id, run_id, customer_code, scenario,
                                         rank, product_key, score, explain_short, reasons_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(self.ctx.tenant_id)
            .bind(run_id)
            .bind(&output.customer_code)
            .bind(output.scenario)
            .bind(output.rank)
            .bind(&output.product_key)
            .bind(output.score)
            .bind(&output.explain_short)
            .bind(output.reasons.encode()?)
            .execute(&mut *tx)
            .await?;
        }

        for audit in &artifacts.audits {
            sqlx::query(
                r#"
                INSERT INTO audit_output (tenant_id, run_id, customer_code,
                                          severity, rule_code, details_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(self.ctx.tenant_id)
            .bind(run_id)
            .bind(&audit.customer_code)
            .bind(audit.severity)
            .bind(&audit.rule_code)
            .bind(serde_json::to_string(&audit.details)?)
            .execute(&mut *tx)
            .await?;
        }

        for action in &artifacts.next_actions {
            sqlx::query(
                r#"
                INSERT INTO next_action_output (tenant_id, run_id, customer_code,
                                                eligible, reason, scenario, audit_score)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(self.ctx.tenant_id)
            .bind(run_id)
            .bind(&action.customer_code)
            .bind(action.eligible)
            .bind(&action.reason)
            .bind(action.scenario)
            .bind(action.audit_score)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO run_summary (tenant_id, run_id, summary_json) VALUES (?1, ?2, ?3)",
        )
        .bind(self.ctx.tenant_id)
        .bind(run_id)
        .bind(artifacts.summary.encode()?)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE reco_runs SET status = 'completed', finished_at = ?3
            WHERE tenant_id = ?1 AND run_id = ?2 AND status = 'running'
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(run_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CrmError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }

        tx.commit().await?;
        debug!(run_id = %run_id, outputs = artifacts.outputs.len(), "run artifacts persisted");
        Ok(())
    }

    /// Marks the run failed and deletes partial children atomically. Used on
    /// engine failure, cancellation and timeout.
    pub async fn fail(&self, run_id: &RunId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in [
            "reco_output",
            "audit_output",
            "next_action_output",
            "run_summary",
        ] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE tenant_id = ?1 AND run_id = ?2"
            ))
            .bind(self.ctx.tenant_id)
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE reco_runs SET status = 'failed', finished_at = ?3
            WHERE tenant_id = ?1 AND run_id = ?2
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(run_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        warn!(run_id = %run_id, "run marked failed, partial outputs discarded");
        Ok(())
    }

    pub async fn get(&self, run_id: &RunId) -> Result<Option<RecoRun>> {
        let run = sqlx::query_as::<_, RecoRun>(
            "SELECT * FROM reco_runs WHERE tenant_id = ?1 AND run_id = ?2",
        )
        .bind(self.ctx.tenant_id)
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<RecoRun>> {
        let runs = sqlx::query_as::<_, RecoRun>(
            r#"
            SELECT * FROM reco_runs WHERE tenant_id = ?1
            ORDER BY started_at DESC LIMIT ?2
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    pub async fn outputs(&self, run_id: &RunId) -> Result<Vec<RecoOutput>> {
        let rows = sqlx::query_as::<_, RecoOutput>(
            r#"
            SELECT * FROM reco_output
            WHERE tenant_id = ?1 AND run_id = ?2
            ORDER BY customer_code, rank
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn audits(&self, run_id: &RunId) -> Result<Vec<AuditOutput>> {
        let rows = sqlx::query_as::<_, AuditOutput>(
            r#"
            SELECT * FROM audit_output
            WHERE tenant_id = ?1 AND run_id = ?2
            ORDER BY customer_code, id
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn next_actions(&self, run_id: &RunId) -> Result<Vec<NextActionOutput>> {
        let rows = sqlx::query_as::<_, NextActionOutput>(
            r#"
            SELECT * FROM next_action_output
            WHERE tenant_id = ?1 AND run_id = ?2
            ORDER BY customer_code
            "#,
        )
        .bind(self.ctx.tenant_id)
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn summary(&self, run_id: &RunId) -> Result<Option<RunSummary>> {
        let summary = sqlx::query_as::<_, RunSummary>(
            "SELECT * FROM run_summary WHERE tenant_id = ?1 AND run_id = ?2",
        )
        .bind(self.ctx.tenant_id)
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(summary)
    }

    /// Run status as seen by orchestration; `None` for unknown runs.
    pub async fn status(&self, run_id: &RunId) -> Result<Option<RunStatus>> {
        Ok(self.get(run_id).await?.map(|run| run.status))
    }
}
