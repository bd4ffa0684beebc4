//! End-to-end engine scenarios against an in-memory store.

use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;

use cuvee_analytics::{PreferenceService, RfmService};
use cuvee_core::{Store, TenantContext, TenantId};
use cuvee_crm::{
    AromaAxes, AromaProfile, ClientRepository, CreateClientRequest, CreateProductRequest,
    NewNextAction, NewRecoRun, NewSale, PreferredFamilies, FamilyShare, ProductRepository,
    RunArtifacts, RunRepository, RunStatus, RunSummaryStats, SaleRepository, Scenario, Severity,
    SqliteClientRepository, SqliteProductRepository, PROFILE_SCHEMA_VERSION, RUN_SCHEMA_VERSION,
};
use cuvee_engine::{
    DispatchService, EngineError, RecommendationEngine, RunOptions, ScoringConfig,
};

async fn setup() -> (Store, TenantContext) {
    let store = Store::in_memory().await.unwrap();
    (store, TenantContext::new(TenantId(1)))
}

async fn create_client(store: &Store, ctx: &TenantContext, code: &str, email: Option<&str>) {
    SqliteClientRepository::new(store.pool().clone(), ctx.clone())
        .create(&CreateClientRequest {
            client_code: code.to_string(),
            name: Some(format!("Client {code}")),
            email: email.map(|e| e.to_string()),
            email_opt_out: false,
        })
        .await
        .unwrap();
}

async fn create_product(
    store: &Store,
    ctx: &TenantContext,
    key: &str,
    price: f64,
    family: &str,
) {
    SqliteProductRepository::new(store.pool().clone(), ctx.clone())
        .create(&CreateProductRequest {
            product_key: key.to_string(),
            name: format!("Wine {key}"),
            family_crm: Some(family.to_string()),
            price_ttc: Some(price),
            ..Default::default()
        })
        .await
        .unwrap();
}

async fn create_sale(
    store: &Store,
    ctx: &TenantContext,
    doc: &str,
    key: &str,
    code: &str,
    amount: f64,
    days_ago: i64,
) {
    SaleRepository::new(store.pool().clone(), ctx.clone())
        .insert(&NewSale {
            document_id: doc.to_string(),
            product_key: Some(key.to_string()),
            client_code: code.to_string(),
            quantity: Some(1.0),
            amount: Some(amount),
            sale_date: Some(Utc::now().date_naive() - chrono::Duration::days(days_ago)),
        })
        .await
        .unwrap();
}

/// S1: a client with no email blocks the export gate.
#[tokio::test]
async fn gating_blocks_missing_email() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("ok@test.com")).await;
    create_client(&store, &ctx, "C2", None).await;
    create_product(&store, &ctx, "P1", 8.0, "Rouge").await;
    create_product(&store, &ctx, "P2", 20.0, "Rouge").await;
    create_sale(&store, &ctx, "INV-1", "P1", "C1", 8.0, 60).await;
    create_sale(&store, &ctx, "INV-2", "P1", "C2", 8.0, 60).await;

    RfmService::new(store.clone(), ctx.clone()).recompute().await.unwrap();
    PreferenceService::new(store.clone(), ctx.clone())
        .recompute_preferences()
        .await
        .unwrap();

    let engine = RecommendationEngine::for_tenant(store.clone(), ctx.clone())
        .await
        .unwrap();
    let outcome = engine
        .generate_recommendations_run(RunOptions {
            top_n: 2,
            silence_window_days: 7,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(!outcome.summary.gate_export);
    assert!(outcome.summary.n_errors >= 1);

    let repo = RunRepository::new(store.pool().clone(), ctx.clone());
    let actions = repo.next_actions(&outcome.run_id).await.unwrap();
    assert_eq!(actions.len(), 2);

    let c1 = actions.iter().find(|a| a.customer_code == "C1").unwrap();
    assert!(c1.eligible);
    assert!(c1.reason.is_none());

    let c2 = actions.iter().find(|a| a.customer_code == "C2").unwrap();
    assert!(!c2.eligible);
    let reason = c2.reason.as_deref().unwrap();
    assert!(
        reason == "MISSING_EMAIL" || reason == "AUDIT_SCORE_BELOW_THRESHOLD",
        "unexpected reason {reason}"
    );

    // Invariant: eligibility mirrors the audit rows.
    let audits = repo.audits(&outcome.run_id).await.unwrap();
    for action in &actions {
        let errors = audits
            .iter()
            .filter(|a| a.customer_code == action.customer_code && a.severity == Severity::Error)
            .count();
        assert_eq!(
            action.eligible,
            errors == 0 && action.audit_score >= 80.0,
            "eligibility invariant broken for {}",
            action.customer_code
        );
    }
}

/// S3: cross-sell never proposes an already-purchased product; ranks are
/// contiguous with distinct keys.
#[tokio::test]
async fn cross_sell_avoids_purchased_products() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("c1@test.com")).await;
    create_product(&store, &ctx, "P1", 10.0, "Rouge").await;
    create_product(&store, &ctx, "P2", 10.0, "Blanc").await;
    create_product(&store, &ctx, "P3", 10.0, "Rosé").await;
    create_sale(&store, &ctx, "INV-1", "P1", "C1", 10.0, 40).await;

    let products = SqliteProductRepository::new(store.pool().clone(), ctx.clone());
    products.set_popularity("P1", 0.9).await.unwrap();
    products.set_popularity("P2", 0.5).await.unwrap();
    products.set_popularity("P3", 0.2).await.unwrap();

    // Shape the derived fields so the matrix lands on cross_sell: fresh,
    // low monetary, concentrated preferences.
    let clients = SqliteClientRepository::new(store.pool().clone(), ctx.clone());
    sqlx::query(
        "UPDATE clients SET recency = 0, monetary = 0, rfm_score = 511, average_order_value = 10 \
         WHERE client_code = 'C1'",
    )
    .execute(store.pool())
    .await
    .unwrap();
    let prefs = PreferredFamilies::new(vec![FamilyShare {
        family: "Rouge".to_string(),
        share: 1.0,
    }]);
    clients
        .update_preferences("C1", Some(&prefs.encode().unwrap()), None)
        .await
        .unwrap();

    let engine = RecommendationEngine::new(store.clone(), ctx.clone(), ScoringConfig::default());
    let outcome = engine
        .generate_recommendations_run(RunOptions::default())
        .await
        .unwrap();

    let outputs = RunRepository::new(store.pool().clone(), ctx.clone())
        .outputs(&outcome.run_id)
        .await
        .unwrap();
    assert_eq!(outcome.summary.scenario_counts.get("cross_sell"), Some(&1));

    let keys: Vec<&str> = outputs.iter().map(|o| o.product_key.as_str()).collect();
    assert!(!keys.contains(&"P1"));
    assert_eq!(keys, vec!["P2", "P3"]);

    let ranks: Vec<i64> = outputs.iter().map(|o| o.rank).collect();
    assert_eq!(ranks, vec![1, 2]);
    let distinct: HashSet<&str> = keys.iter().copied().collect();
    assert_eq!(distinct.len(), keys.len());
}

/// S4: upsell only proposes products priced above the client's average.
#[tokio::test]
async fn upsell_requires_higher_price() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("c1@test.com")).await;
    create_product(&store, &ctx, "P1", 10.0, "Rouge").await;
    create_product(&store, &ctx, "P2", 8.0, "Rouge").await;
    create_product(&store, &ctx, "P3", 25.0, "Rouge").await;
    create_sale(&store, &ctx, "INV-1", "P1", "C1", 10.0, 40).await;

    // High monetary plus a confident aroma profile pushes upsell past
    // winback in the matrix.
    let aroma = AromaProfile {
        schema_version: PROFILE_SCHEMA_VERSION,
        axes: AromaAxes::default(),
        top_axes: vec![],
        confidence: 0.9,
        level: "High".to_string(),
    };
    sqlx::query(
        "UPDATE clients SET recency = 0, monetary = 100, rfm_score = 511, \
         average_order_value = 10, aroma_profile = ?1 WHERE client_code = 'C1'",
    )
    .bind(serde_json::to_string(&aroma).unwrap())
    .execute(store.pool())
    .await
    .unwrap();

    let engine = RecommendationEngine::new(store.clone(), ctx.clone(), ScoringConfig::default());
    let outcome = engine
        .generate_recommendations_run(RunOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.summary.scenario_counts.get("upsell"), Some(&1));
    let outputs = RunRepository::new(store.pool().clone(), ctx.clone())
        .outputs(&outcome.run_id)
        .await
        .unwrap();
    let keys: Vec<&str> = outputs.iter().map(|o| o.product_key.as_str()).collect();
    assert_eq!(keys, vec!["P3"]);

    // No UPSELL_NOT_HIGHER issue, the gate stays open.
    assert!(outcome.summary.gate_export);
}

/// Cancellation marks the run failed and leaves no partial artifacts.
#[tokio::test]
async fn cancelled_run_is_failed_and_empty() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("c1@test.com")).await;
    create_product(&store, &ctx, "P1", 10.0, "Rouge").await;

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(true);
    let engine = RecommendationEngine::new(store.clone(), ctx.clone(), ScoringConfig::default());
    let err = engine
        .generate_recommendations_run(RunOptions {
            cancel: Some(cancel_rx),
            ..Default::default()
        })
        .await
        .unwrap_err();
    drop(cancel_tx);
    assert!(matches!(err, EngineError::Cancelled));

    let repo = RunRepository::new(store.pool().clone(), ctx.clone());
    let runs = repo.list(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(repo.outputs(&runs[0].run_id).await.unwrap().is_empty());
}

/// A zero timeout expires before any client is scored.
#[tokio::test]
async fn timeout_cancels_the_run() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("c1@test.com")).await;
    create_product(&store, &ctx, "P1", 10.0, "Rouge").await;

    let engine = RecommendationEngine::new(store.clone(), ctx.clone(), ScoringConfig::default());
    let err = engine
        .generate_recommendations_run(RunOptions {
            timeout: Some(Duration::from_nanos(1)),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));

    let repo = RunRepository::new(store.pool().clone(), ctx.clone());
    let runs = repo.list(10).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
}

/// Run artifacts are invisible to other tenants.
#[tokio::test]
async fn run_artifacts_are_tenant_scoped() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("c1@test.com")).await;
    create_product(&store, &ctx, "P1", 10.0, "Rouge").await;

    let engine = RecommendationEngine::new(store.clone(), ctx.clone(), ScoringConfig::default());
    let outcome = engine
        .generate_recommendations_run(RunOptions::default())
        .await
        .unwrap();

    let other = RunRepository::new(
        store.pool().clone(),
        TenantContext::new(TenantId(2)),
    );
    assert!(other.get(&outcome.run_id).await.unwrap().is_none());
    assert!(other.outputs(&outcome.run_id).await.unwrap().is_empty());
    assert!(other.next_actions(&outcome.run_id).await.unwrap().is_empty());
}

fn summary(gate_export: bool) -> RunSummaryStats {
    RunSummaryStats {
        schema_version: RUN_SCHEMA_VERSION,
        gating_rate: 1.0,
        total_clients: 1,
        total_recommendations: 1,
        scenario_counts: Default::default(),
        top_errors: vec![],
        n_errors: if gate_export { 0 } else { 1 },
        n_warns: 0,
        audit_score: if gate_export { 100.0 } else { 60.0 },
        gate_export,
        config_hash: "hash".to_string(),
        seed: 42,
    }
}

/// Invariant 8: dry-run dispatch makes no external call and records one
/// `dry_run` contact event per targeted client.
#[tokio::test]
async fn dry_run_dispatch_records_contact_events_only() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("c1@test.com")).await;

    let repo = RunRepository::new(store.pool().clone(), ctx.clone());
    let run_id = cuvee_core::RunId::generate();
    repo.create(&NewRecoRun {
        run_id: run_id.clone(),
        dataset_version: None,
        config_hash: None,
        code_version: None,
    })
    .await
    .unwrap();
    repo.persist_artifacts(
        &run_id,
        &RunArtifacts {
            outputs: vec![],
            audits: vec![],
            next_actions: vec![NewNextAction {
                customer_code: "C1".to_string(),
                eligible: true,
                reason: None,
                scenario: Some(Scenario::CrossSell),
                audit_score: 100.0,
            }],
            summary: summary(true),
        },
    )
    .await
    .unwrap();

    let dispatch = DispatchService::new(store.clone(), ctx.clone());
    let transport = cuvee_engine::RecordingDispatchClient::default();
    let receipt = dispatch
        .send_batch(&run_id, 200, None, Some(&transport))
        .await
        .unwrap();

    assert!(receipt.dry_run);
    assert_eq!(receipt.count, 1);
    // No external call in dry-run mode.
    assert!(transport.calls.lock().unwrap().is_empty());

    let events: Vec<(String,)> = sqlx::query_as(
        "SELECT status FROM contact_events WHERE tenant_id = 1",
    )
    .fetch_all(store.pool())
    .await
    .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "dry_run");
}

/// Artifacts export to per-run CSV/JSON files.
#[tokio::test]
async fn run_artifacts_export_to_files() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("c1@test.com")).await;
    create_product(&store, &ctx, "P1", 10.0, "Rouge").await;

    let engine = RecommendationEngine::new(store.clone(), ctx.clone(), ScoringConfig::default());
    let outcome = engine
        .generate_recommendations_run(RunOptions::default())
        .await
        .unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let paths = cuvee_engine::RunExporter::new(store.clone(), ctx.clone(), dir.path())
        .export_run(&outcome.run_id)
        .await
        .unwrap();

    let reco_csv = std::fs::read_to_string(&paths.reco_output).unwrap();
    assert!(reco_csv.starts_with("\"run_id\""));
    assert!(reco_csv.contains("C1"));

    let summary_json = std::fs::read_to_string(&paths.run_summary).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&summary_json).unwrap();
    assert_eq!(parsed["gate_export"], serde_json::json!(true));
    assert_eq!(parsed["seed"], serde_json::json!(42));
}

/// Consumers must refuse to dispatch when the gate is closed; batch sizes
/// are bounded.
#[tokio::test]
async fn dispatch_honors_gate_and_batch_bounds() {
    let (store, ctx) = setup().await;
    create_client(&store, &ctx, "C1", Some("c1@test.com")).await;

    let repo = RunRepository::new(store.pool().clone(), ctx.clone());
    let run_id = cuvee_core::RunId::generate();
    repo.create(&NewRecoRun {
        run_id: run_id.clone(),
        dataset_version: None,
        config_hash: None,
        code_version: None,
    })
    .await
    .unwrap();
    repo.persist_artifacts(
        &run_id,
        &RunArtifacts {
            outputs: vec![],
            audits: vec![],
            next_actions: vec![NewNextAction {
                customer_code: "C1".to_string(),
                eligible: true,
                reason: None,
                scenario: None,
                audit_score: 100.0,
            }],
            summary: summary(false),
        },
    )
    .await
    .unwrap();

    let dispatch = DispatchService::new(store.clone(), ctx.clone());
    let err = dispatch.send_batch(&run_id, 250, None, None).await.unwrap_err();
    assert!(matches!(err, EngineError::GateClosed { .. }));

    let err = dispatch.send_batch(&run_id, 100, None, None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidBatchSize { .. }));
}
