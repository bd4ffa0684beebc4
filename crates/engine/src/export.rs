//! Run artifact export: CSV for the tabular outputs, JSON for the summary.

use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{EngineError, Result};
use cuvee_core::{RunId, Store, TenantContext};
use cuvee_crm::RunRepository;

#[derive(Debug, Clone, Serialize)]
pub struct RunExportPaths {
    pub reco_output: PathBuf,
    pub audit_output: PathBuf,
    pub next_action: PathBuf,
    pub run_summary: PathBuf,
}

pub struct RunExporter {
    store: Store,
    ctx: TenantContext,
    export_dir: PathBuf,
}

impl RunExporter {
    pub fn new(store: Store, ctx: TenantContext, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            ctx,
            export_dir: export_dir.into(),
        }
    }

    /// Writes `reco_output_{run_id}.csv`, `audit_output_{run_id}.csv`,
    /// `next_action_{run_id}.csv` and `run_summary_{run_id}.json` under the
    /// export directory.
    pub async fn export_run(&self, run_id: &RunId) -> Result<RunExportPaths> {
        let repo = RunRepository::new(self.store.pool().clone(), self.ctx.clone());
        repo.get(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                run_id: run_id.to_string(),
            })?;

        std::fs::create_dir_all(&self.export_dir).map_err(cuvee_core::Error::Io)?;
        let paths = RunExportPaths {
            reco_output: self.export_dir.join(format!("reco_output_{run_id}.csv")),
            audit_output: self.export_dir.join(format!("audit_output_{run_id}.csv")),
            next_action: self.export_dir.join(format!("next_action_{run_id}.csv")),
            run_summary: self.export_dir.join(format!("run_summary_{run_id}.json")),
        };

        let mut writer = csv_writer(&paths.reco_output)?;
        write_header(
            &mut writer,
            &[
                "run_id",
                "customer_code",
                "scenario",
                "rank",
                "product_key",
                "score",
                "explain_short",
            ],
        )?;
        for row in repo.outputs(run_id).await? {
            write_row(
                &mut writer,
                &[
                    row.run_id.to_string(),
                    row.customer_code,
                    row.scenario.to_string(),
                    row.rank.to_string(),
                    row.product_key,
                    row.score.to_string(),
                    row.explain_short,
                ],
            )?;
        }
        writer.flush().map_err(cuvee_core::Error::Io)?;

        let mut writer = csv_writer(&paths.audit_output)?;
        write_header(
            &mut writer,
            &["run_id", "customer_code", "severity", "rule_code", "details"],
        )?;
        for row in repo.audits(run_id).await? {
            write_row(
                &mut writer,
                &[
                    row.run_id.to_string(),
                    row.customer_code,
                    row.severity.to_string(),
                    row.rule_code,
                    row.details_json,
                ],
            )?;
        }
        writer.flush().map_err(cuvee_core::Error::Io)?;

        let mut writer = csv_writer(&paths.next_action)?;
        write_header(
            &mut writer,
            &[
                "run_id",
                "customer_code",
                "eligible",
                "reason",
                "scenario",
                "audit_score",
            ],
        )?;
        for row in repo.next_actions(run_id).await? {
            write_row(
                &mut writer,
                &[
                    row.run_id.to_string(),
                    row.customer_code,
                    row.eligible.to_string(),
                    row.reason.unwrap_or_default(),
                    row.scenario.map(|s| s.to_string()).unwrap_or_default(),
                    row.audit_score.to_string(),
                ],
            )?;
        }
        writer.flush().map_err(cuvee_core::Error::Io)?;

        let summary = repo
            .summary(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        let stats = summary.stats()?;
        std::fs::write(
            &paths.run_summary,
            serde_json::to_string_pretty(&stats)?,
        )
        .map_err(cuvee_core::Error::Io)?;

        info!(
            tenant_id = %self.ctx.tenant_id,
            run_id = %run_id,
            dir = %self.export_dir.display(),
            "run artifacts exported"
        );
        Ok(paths)
    }
}

fn csv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_path(path)
        .map_err(|e| EngineError::Internal {
            message: format!("cannot open {}: {e}", path.display()),
        })
}

fn write_header(writer: &mut csv::Writer<std::fs::File>, fields: &[&str]) -> Result<()> {
    writer.write_record(fields).map_err(|e| EngineError::Internal {
        message: format!("csv write failed: {e}"),
    })
}

fn write_row(writer: &mut csv::Writer<std::fs::File>, fields: &[String]) -> Result<()> {
    writer.write_record(fields).map_err(|e| EngineError::Internal {
        message: format!("csv write failed: {e}"),
    })
}
