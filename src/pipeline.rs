//! Multi-tenant pipeline CLI: ingest → load → derived metrics → data
//! quality → recommendation run → export.
//!
//! One invocation processes any number of tenants; the file pipeline fans
//! out in parallel, the per-tenant analytics and runs execute sequentially
//! under each tenant's advisory lock.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cuvee_analytics::{
    AromaService, ClusterService, PreferenceService, QualityAuditService, RfmService,
};
use cuvee_core::{AppConfig, Store, TenantContext, TenantId};
use cuvee_crm::TenantRepository;
use cuvee_engine::{RecommendationEngine, RunExporter, RunOptions};
use cuvee_ingest::run_pipeline_multi_tenant;

#[derive(Parser, Debug)]
#[command(
    name = "pipeline",
    about = "Run the CRM data pipeline for one or more tenants"
)]
struct Args {
    /// Tenant identifier; repeat for several tenants.
    #[arg(long = "tenant", required = true)]
    tenants: Vec<i64>,

    /// Directory containing the tenant CSV exports. When a subdirectory
    /// named after the tenant id exists it is used, otherwise the
    /// directory itself.
    #[arg(long)]
    source: PathBuf,

    /// Load each tenant into suffixed tables instead of shared ones.
    #[arg(long)]
    isolate_schema: bool,

    /// Recommendations kept per client (defaults from configuration).
    #[arg(long)]
    top_n: Option<usize>,

    /// Marketing silence window in days (defaults from configuration).
    #[arg(long)]
    silence_window_days: Option<i64>,

    /// Export directory for run artifacts (defaults from configuration).
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Stop after ingestion and derived metrics; skip the reco run.
    #[arg(long)]
    skip_reco: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::load().context("configuration load failed")?;
    // SQLite creates the database file, not its parent directory.
    std::fs::create_dir_all(&config.data.root).ok();
    let store = Store::connect(&config.database.url, config.database.max_connections)
        .await
        .context("store connection failed")?;

    let tenant_repo = TenantRepository::new(store.pool().clone());
    let mut jobs = Vec::new();
    for id in &args.tenants {
        let tenant_id = TenantId(*id);
        tenant_repo
            .ensure(tenant_id, &format!("tenant-{id}"))
            .await
            .with_context(|| format!("tenant {id} registration failed"))?;

        let candidate = args.source.join(id.to_string());
        let source_dir = if candidate.is_dir() {
            candidate
        } else {
            args.source.clone()
        };
        jobs.push((TenantContext::new(tenant_id), source_dir));
    }

    let outcomes =
        run_pipeline_multi_tenant(&store, jobs, &config.data.root, args.isolate_schema).await;

    let mut reports = Vec::new();
    for outcome in outcomes {
        let ctx = TenantContext::new(outcome.tenant_id);
        if !outcome.success {
            warn!(
                tenant_id = %outcome.tenant_id,
                errors = ?outcome.errors,
                "pipeline failed, skipping analytics and reco run"
            );
            reports.push(serde_json::json!({
                "tenant_id": outcome.tenant_id,
                "pipeline": outcome,
                "run": serde_json::Value::Null,
            }));
            continue;
        }

        let clients = RfmService::new(store.clone(), ctx.clone()).recompute().await?;
        let preferences = PreferenceService::with_quantiles(
            store.clone(),
            ctx.clone(),
            config.engine.budget_low_quantile,
            config.engine.budget_high_quantile,
        );
        preferences.recompute_preferences().await?;
        preferences.refresh_product_popularity().await?;
        AromaService::new(store.clone(), ctx.clone())
            .recompute_profiles()
            .await?;
        let clusters = ClusterService::new(
            store.clone(),
            ctx.clone(),
            config.engine.kmeans_seed,
            config.engine.kmeans_clusters,
        )
        .recompute()
        .await?;
        let quality = QualityAuditService::new(store.clone(), ctx.clone())
            .run(chrono_today())
            .await?;
        info!(
            tenant_id = %outcome.tenant_id,
            clients,
            clusters = clusters.len(),
            quality_score = quality.score,
            "derived metrics recomputed"
        );

        let run_report = if args.skip_reco {
            serde_json::Value::Null
        } else {
            let engine = RecommendationEngine::for_tenant(store.clone(), ctx.clone()).await?;
            let run = engine
                .generate_recommendations_run(RunOptions {
                    top_n: args.top_n.unwrap_or(config.engine.top_n),
                    silence_window_days: args
                        .silence_window_days
                        .unwrap_or(config.engine.silence_window_days),
                    workers: config.engine.workers,
                    timeout: Some(std::time::Duration::from_secs(
                        config.engine.run_timeout_seconds,
                    )),
                    seed: config.engine.kmeans_seed,
                    dataset_version: outcome
                        .report
                        .as_ref()
                        .map(|r| r.dataset_version.clone()),
                    cancel: None,
                })
                .await?;

            let export_dir = args
                .export_dir
                .clone()
                .unwrap_or_else(|| config.data.export_dir.clone());
            let paths = RunExporter::new(store.clone(), ctx.clone(), export_dir)
                .export_run(&run.run_id)
                .await?;
            serde_json::json!({
                "run_id": run.run_id,
                "summary": run.summary,
                "exports": paths,
            })
        };

        reports.push(serde_json::json!({
            "tenant_id": outcome.tenant_id,
            "pipeline": outcome,
            "run": run_report,
        }));
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn chrono_today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}
