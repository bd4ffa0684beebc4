//! Per-tenant pipeline orchestration: ingest → load → verify.
//!
//! Tenants run in parallel as independent tasks; within one tenant the
//! pipeline is sequential and cooperative so runs stay deterministic.
//! Errors never cross tenant boundaries: each task resolves to its own
//! outcome, failed or not.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

use crate::loader::{LoadOutcome, LoadVerification, Loader};
use crate::report::IngestionReport;
use crate::runner::IngestionRunner;
use cuvee_core::{Store, TenantContext, TenantId};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineTimings {
    pub ingestion_secs: f64,
    pub load_secs: f64,
}

/// Outcome of one tenant's pipeline run, returned to orchestration callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPipelineOutcome {
    pub tenant_id: TenantId,
    pub success: bool,
    pub total_duration_secs: f64,
    pub timings: PipelineTimings,
    pub report: Option<IngestionReport>,
    pub load_results: BTreeMap<String, LoadOutcome>,
    pub verification: LoadVerification,
    pub errors: Vec<String>,
}

impl TenantPipelineOutcome {
    fn failed(tenant_id: TenantId, elapsed: f64, message: String) -> Self {
        Self {
            tenant_id,
            success: false,
            total_duration_secs: elapsed,
            timings: PipelineTimings::default(),
            report: None,
            load_results: BTreeMap::new(),
            verification: LoadVerification::default(),
            errors: vec![message],
        }
    }
}

/// Runs the full file pipeline for one tenant. Storage and I/O failures
/// abort this tenant's run only and come back in `errors`.
pub async fn run_pipeline_for_tenant(
    store: &Store,
    ctx: &TenantContext,
    data_root: &Path,
    source_dir: &Path,
    isolate_schema: bool,
) -> TenantPipelineOutcome {
    let started = Instant::now();
    info!(tenant_id = %ctx.tenant_id, source = %source_dir.display(), "pipeline started");

    let runner = IngestionRunner::new(data_root);
    let ingest_started = Instant::now();
    let report = match runner.ingest_dir(ctx, source_dir).await {
        Ok(report) => report,
        Err(err) => {
            error!(tenant_id = %ctx.tenant_id, error = %err, "ingestion failed");
            return TenantPipelineOutcome::failed(
                ctx.tenant_id,
                started.elapsed().as_secs_f64(),
                format!("ingestion failed: {err}"),
            );
        }
    };
    let ingestion_secs = ingest_started.elapsed().as_secs_f64();

    let curated_dir = runner.run_dir(ctx, &report.run_id).join("curated");
    let loader = Loader::new(store.clone(), ctx.clone());
    let load_started = Instant::now();
    let load_results = loader
        .load_all_curated(&curated_dir, Some(&report), isolate_schema)
        .await;
    let load_secs = load_started.elapsed().as_secs_f64();

    let verification = Loader::verify(&load_results);
    let mut errors: Vec<String> = report.errors.clone();
    for outcome in load_results.values() {
        if !outcome.success {
            errors.push(format!(
                "{}: {}",
                outcome.table,
                outcome.error_type.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    let success = verification.success && report.errors.is_empty();
    info!(
        tenant_id = %ctx.tenant_id,
        run_id = %report.run_id,
        success,
        total_rows = verification.total_rows,
        resolved_aliases = verification.resolved_aliases,
        "pipeline finished"
    );

    TenantPipelineOutcome {
        tenant_id: ctx.tenant_id,
        success,
        total_duration_secs: started.elapsed().as_secs_f64(),
        timings: PipelineTimings {
            ingestion_secs,
            load_secs,
        },
        report: Some(report),
        load_results,
        verification,
        errors,
    }
}

/// Fans the pipeline out over several tenants in parallel. Each tenant's
/// failures stay local to its own outcome.
pub async fn run_pipeline_multi_tenant(
    store: &Store,
    jobs: Vec<(TenantContext, PathBuf)>,
    data_root: &Path,
    isolate_schema: bool,
) -> Vec<TenantPipelineOutcome> {
    let mut handles = Vec::with_capacity(jobs.len());
    for (ctx, source_dir) in jobs {
        let store = store.clone();
        let data_root = data_root.to_path_buf();
        handles.push(tokio::spawn(async move {
            run_pipeline_for_tenant(&store, &ctx, &data_root, &source_dir, isolate_schema).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_err) => {
                error!(error = %join_err, "pipeline task panicked");
            }
        }
    }
    outcomes
}
