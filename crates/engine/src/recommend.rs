//! Recommendation run engine.
//!
//! One run loads the tenant's world state once, shards per-client scoring
//! over a bounded worker pool, audits every client, and persists the whole
//! artifact set in a single transaction. Cancellation is cooperative
//! between clients; a timeout or cancel marks the run `failed` and leaves
//! no partial outputs behind.

use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::audit::{audit_client, average_purchase_price, ClientAudit, ClientAuditInput};
use crate::error::{EngineError, Result};
use crate::scenario::{decide, decide_rule_based, ScenarioFeatures};
use crate::scoring::{ScoreWeights, ScoringConfig};
use crate::summary::{summarize, ClientSummaryInput};
use cuvee_core::{RunId, Store, TenantContext};
use cuvee_crm::{
    Client, ClientRepository, ContactEvent, NewRecoOutput, NewRecoRun, NewNextAction, Product,
    ProductRepository, RunArtifacts, RunRepository, RunStatus, RunSummaryStats, Sale,
    SaleRepository, Scenario, ScoreReasons, SqliteClientRepository, SqliteProductRepository,
    RUN_SCHEMA_VERSION,
};

/// Tuning knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub top_n: usize,
    pub silence_window_days: i64,
    /// Worker-pool width for per-client scoring.
    pub workers: usize,
    /// Wall-clock budget; expiry cancels the run.
    pub timeout: Option<Duration>,
    /// Clustering seed, folded into `config_hash`.
    pub seed: u64,
    /// Hash of the ingested raw files this run was computed from.
    pub dataset_version: Option<String>,
    /// Cooperative cancellation signal, checked between clients.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            top_n: 5,
            silence_window_days: 7,
            workers: 4,
            timeout: None,
            seed: 42,
            dataset_version: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub summary: RunSummaryStats,
    pub status: RunStatus,
}

/// Immutable world state shared with the scoring workers.
struct WorldState {
    products_by_key: HashMap<String, Product>,
    sales_by_client: HashMap<String, Vec<Sale>>,
    scoring: ScoringConfig,
    max_price: f64,
    max_rfm: i64,
    top_n: usize,
    today: NaiveDate,
}

/// Output of the pure per-client computation.
#[derive(Debug, Clone)]
struct ClientComputation {
    client_code: String,
    scenario: Scenario,
    recos: Vec<NewRecoOutput>,
}

pub struct RecommendationEngine {
    store: Store,
    ctx: TenantContext,
    scoring: ScoringConfig,
}

impl RecommendationEngine {
    pub fn new(store: Store, ctx: TenantContext, scoring: ScoringConfig) -> Self {
        Self {
            store,
            ctx,
            scoring,
        }
    }

    /// Engine with the tenant's scoring override applied.
    pub async fn for_tenant(store: Store, ctx: TenantContext) -> Result<Self> {
        let scoring = ScoringConfig::for_tenant(&store, &ctx).await?;
        Ok(Self::new(store, ctx, scoring))
    }

    /// Runs the full cycle: scenario → candidates → scoring → audit →
    /// summary, persisted atomically. On cancellation, timeout or storage
    /// failure the run is marked `failed` and the error surfaces.
    pub async fn generate_recommendations_run(&self, options: RunOptions) -> Result<RunOutcome> {
        // Exclusive writer for this tenant: keeps derived-metric updates
        // from interleaving with the run.
        let _guard = self.store.tenant_lock(self.ctx.tenant_id).await;

        let clients = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let products = SqliteProductRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let sales = SaleRepository::new(self.store.pool().clone(), self.ctx.clone())
            .list()
            .await?;
        let events_by_client = self.load_contact_events().await?;

        let config_hash = self.scoring.config_hash(options.seed)?;
        let run_id = RunId::generate();
        let run_repo = RunRepository::new(self.store.pool().clone(), self.ctx.clone());
        run_repo
            .create(&NewRecoRun {
                run_id: run_id.clone(),
                dataset_version: options.dataset_version.clone(),
                config_hash: Some(config_hash.clone()),
                code_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            })
            .await?;

        let result = self
            .execute(&run_id, &run_repo, clients, products, sales, events_by_client, &options, config_hash)
            .await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(fail_err) = run_repo.fail(&run_id).await {
                    warn!(run_id = %run_id, error = %fail_err, "failed to mark run as failed");
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        run_id: &RunId,
        run_repo: &RunRepository,
        clients: Vec<Client>,
        products: Vec<Product>,
        sales: Vec<Sale>,
        events_by_client: HashMap<i64, Vec<ContactEvent>>,
        options: &RunOptions,
        config_hash: String,
    ) -> Result<RunOutcome> {
        let max_price = products
            .iter()
            .filter_map(|p| p.price_ttc)
            .fold(0.0f64, f64::max);
        let max_rfm = clients.iter().map(|c| c.rfm_score).max().unwrap_or(0);

        let mut products_by_key = HashMap::with_capacity(products.len());
        for product in products {
            products_by_key.insert(product.product_key.clone(), product);
        }
        let mut sales_by_client: HashMap<String, Vec<Sale>> = HashMap::new();
        for sale in sales {
            sales_by_client
                .entry(sale.client_code.clone())
                .or_default()
                .push(sale);
        }

        let world = Arc::new(WorldState {
            products_by_key,
            sales_by_client,
            scoring: self.scoring.clone(),
            max_price,
            max_rfm,
            top_n: options.top_n,
            today: Utc::now().date_naive(),
        });

        let computations = self
            .run_worker_pool(&clients, world.clone(), options)
            .await?;
        let mut by_code: HashMap<String, ClientComputation> = computations
            .into_iter()
            .map(|c| (c.client_code.clone(), c))
            .collect();

        let now = Utc::now();
        let empty_events: Vec<ContactEvent> = Vec::new();
        let empty_sales: Vec<Sale> = Vec::new();

        let mut outputs = Vec::new();
        let mut audit_rows = Vec::new();
        let mut next_actions = Vec::new();
        let mut per_client: Vec<(Option<Scenario>, usize, ClientAudit)> = Vec::new();

        for client in &clients {
            let computation = by_code.remove(&client.client_code).ok_or_else(|| {
                EngineError::Internal {
                    message: format!("no computation for client {}", client.client_code),
                }
            })?;

            let contact_events = events_by_client
                .get(&client.id)
                .unwrap_or(&empty_events);
            let purchases = world
                .sales_by_client
                .get(&client.client_code)
                .unwrap_or(&empty_sales);

            let audit = audit_client(&ClientAuditInput {
                client,
                recos: &computation.recos,
                product_map: &world.products_by_key,
                contact_events,
                purchases,
                silence_window_days: options.silence_window_days,
                now,
            });

            next_actions.push(NewNextAction {
                customer_code: client.client_code.clone(),
                eligible: audit.eligible,
                reason: audit.reason.clone(),
                scenario: Some(computation.scenario),
                audit_score: audit.audit_score,
            });
            audit_rows.extend(audit.issues.iter().cloned());
            per_client.push((
                Some(computation.scenario),
                computation.recos.len(),
                audit,
            ));
            outputs.extend(computation.recos);
        }

        let summary_inputs: Vec<ClientSummaryInput> = per_client
            .iter()
            .map(|(scenario, reco_count, audit)| ClientSummaryInput {
                scenario: *scenario,
                reco_count: *reco_count,
                audit,
            })
            .collect();
        let summary = summarize(&summary_inputs, config_hash, options.seed);

        let artifacts = RunArtifacts {
            outputs,
            audits: audit_rows,
            next_actions,
            summary: summary.clone(),
        };
        cuvee_core::with_retry("persist_run_artifacts", || {
            let (repo, id, artifacts) = (run_repo, run_id, &artifacts);
            async move {
                repo.persist_artifacts(id, artifacts)
                    .await
                    .map_err(|err| match err {
                        cuvee_crm::CrmError::Database(db) => cuvee_core::Error::Storage(db),
                        other => cuvee_core::Error::internal(other.to_string()),
                    })
            }
        })
        .await?;

        info!(
            tenant_id = %self.ctx.tenant_id,
            run_id = %run_id,
            clients = summary.total_clients,
            recommendations = summary.total_recommendations,
            gate_export = summary.gate_export,
            "recommendation run completed"
        );
        Ok(RunOutcome {
            run_id: run_id.clone(),
            summary,
            status: RunStatus::Completed,
        })
    }

    /// Shards clients over `workers` tasks; results flow back through a
    /// bounded channel. Workers stop at the next client when cancelled.
    async fn run_worker_pool(
        &self,
        clients: &[Client],
        world: Arc<WorldState>,
        options: &RunOptions,
    ) -> Result<Vec<ClientComputation>> {
        let expected = clients.len();
        let workers = options.workers.max(1);
        let chunk_size = expected.div_ceil(workers).max(1);

        let (tx, mut rx) = mpsc::channel::<ClientComputation>(workers * 2);
        for chunk in clients.chunks(chunk_size) {
            let chunk: Vec<Client> = chunk.to_vec();
            let world = world.clone();
            let tx = tx.clone();
            let cancel = options.cancel.clone();
            tokio::spawn(async move {
                for client in chunk {
                    if is_cancelled(&cancel) {
                        return;
                    }
                    let computation = compute_client(&world, &client);
                    if tx.send(computation).await.is_err() {
                        return;
                    }
                    // Cooperative scheduling point between clients.
                    tokio::task::yield_now().await;
                }
            });
        }
        drop(tx);

        let collect = async {
            let mut results = Vec::with_capacity(expected);
            while let Some(item) = rx.recv().await {
                results.push(item);
            }
            results
        };
        let results = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, collect)
                .await
                .map_err(|_| EngineError::Timeout(limit))?,
            None => collect.await,
        };

        if is_cancelled(&options.cancel) || results.len() != expected {
            return Err(EngineError::Cancelled);
        }
        Ok(results)
    }

    async fn load_contact_events(&self) -> Result<HashMap<i64, Vec<ContactEvent>>> {
        let events = sqlx::query_as::<_, ContactEvent>(
            "SELECT * FROM contact_events WHERE tenant_id = ?1 ORDER BY contact_date DESC",
        )
        .bind(self.ctx.tenant_id)
        .fetch_all(self.store.pool())
        .await?;

        let mut grouped: HashMap<i64, Vec<ContactEvent>> = HashMap::new();
        for event in events {
            grouped.entry(event.client_id).or_default().push(event);
        }
        Ok(grouped)
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

/// Pure per-client pass: scenario choice, candidate generation, composite
/// scoring, ranking.
fn compute_client(world: &WorldState, client: &Client) -> ClientComputation {
    let empty: Vec<Sale> = Vec::new();
    let purchases = world
        .sales_by_client
        .get(&client.client_code)
        .unwrap_or(&empty);

    let purchased_keys: HashSet<&str> = purchases
        .iter()
        .filter_map(|s| s.product_key.as_deref())
        .collect();
    let purchased_families: HashSet<&str> = purchased_keys
        .iter()
        .filter_map(|key| world.products_by_key.get(*key))
        .filter_map(|p| p.family_crm.as_deref())
        .collect();
    let avg_price = average_purchase_price(purchases, &world.products_by_key);

    let scenario = if world.scoring.scenario_weights.is_empty() {
        // No matrix configured for this tenant: rule-based fallback.
        decide_rule_based(client, world.today)
    } else {
        let features = ScenarioFeatures::from_client(client, purchased_families.len());
        decide(&features, &world.scoring.scenario_weights).scenario
    };

    let candidates = candidates_for(
        world,
        scenario,
        purchases,
        &purchased_keys,
        &purchased_families,
        avg_price,
    );

    let preferred = client.preferred_families().ok().flatten();
    let weights = world.scoring.score_weights_for(scenario);

    let mut scored: Vec<(f64, &Product, ScoreReasons)> = candidates
        .into_iter()
        .map(|product| {
            let (score, reasons) = score_product(world, client, product, scenario, &weights, preferred.as_ref());
            (score, product, reasons)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.product_key.cmp(&b.1.product_key))
    });
    scored.truncate(world.top_n);

    let recos = scored
        .into_iter()
        .enumerate()
        .map(|(idx, (score, product, reasons))| NewRecoOutput {
            customer_code: client.client_code.clone(),
            scenario,
            rank: idx as i64 + 1,
            product_key: product.product_key.clone(),
            score,
            explain_short: explain(scenario, &weights, &reasons),
            reasons,
        })
        .collect();

    ClientComputation {
        client_code: client.client_code.clone(),
        scenario,
        recos,
    }
}

/// Candidate generation per scenario.
fn candidates_for<'a>(
    world: &'a WorldState,
    scenario: Scenario,
    purchases: &[Sale],
    purchased_keys: &HashSet<&str>,
    purchased_families: &HashSet<&str>,
    avg_price: f64,
) -> Vec<&'a Product> {
    let offerable_not_purchased = || {
        let mut items: Vec<&Product> = world
            .products_by_key
            .values()
            .filter(|p| p.is_offerable() && !purchased_keys.contains(p.product_key.as_str()))
            .collect();
        items.sort_by(|a, b| a.product_key.cmp(&b.product_key));
        items
    };

    match scenario {
        Scenario::Rebuy => {
            // Repurchase candidates exclude anything bought in the last 30
            // days, ordered by historical quantity.
            let cutoff = world.today - chrono::Duration::days(30);
            let mut recent: HashSet<&str> = HashSet::new();
            let mut quantities: HashMap<&str, f64> = HashMap::new();
            for sale in purchases {
                let Some(key) = sale.product_key.as_deref() else {
                    continue;
                };
                *quantities.entry(key).or_insert(0.0) += sale.quantity.unwrap_or(0.0);
                if sale.sale_date.map(|d| d >= cutoff).unwrap_or(false) {
                    recent.insert(key);
                }
            }
            let mut items: Vec<&Product> = purchased_keys
                .iter()
                .filter(|key| !recent.contains(*key))
                .filter_map(|key| world.products_by_key.get(*key))
                .collect();
            items.sort_by(|a, b| {
                let qa = quantities.get(a.product_key.as_str()).copied().unwrap_or(0.0);
                let qb = quantities.get(b.product_key.as_str()).copied().unwrap_or(0.0);
                qb.partial_cmp(&qa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.product_key.cmp(&b.product_key))
            });
            items
        }
        Scenario::CrossSell => {
            let mut items = offerable_not_purchased();
            items.sort_by(|a, b| {
                b.global_popularity_score
                    .partial_cmp(&a.global_popularity_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.product_key.cmp(&b.product_key))
            });
            items
        }
        Scenario::Upsell => {
            let mut items: Vec<&Product> = offerable_not_purchased()
                .into_iter()
                .filter(|p| {
                    p.family_crm
                        .as_deref()
                        .map(|f| purchased_families.contains(f))
                        .unwrap_or(false)
                })
                .filter(|p| p.price_ttc.map(|price| price > avg_price).unwrap_or(false))
                .collect();
            items.sort_by(|a, b| {
                b.price_ttc
                    .partial_cmp(&a.price_ttc)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.product_key.cmp(&b.product_key))
            });
            items
        }
        Scenario::Winback | Scenario::Nurture => offerable_not_purchased(),
    }
}

/// Composite score, every term clamped to [0, 1].
fn score_product(
    world: &WorldState,
    client: &Client,
    product: &Product,
    scenario: Scenario,
    weights: &ScoreWeights,
    preferred: Option<&cuvee_crm::PreferredFamilies>,
) -> (f64, ScoreReasons) {
    let popularity = product.global_popularity_score.clamp(0.0, 1.0);

    let price_fit = match product.price_ttc {
        Some(price) if world.max_price > 0.0 => {
            (1.0 - ((price - client.average_order_value).abs() / world.max_price).min(1.0))
                .clamp(0.0, 1.0)
        }
        _ => 0.5,
    };

    let family_fit = product
        .family_crm
        .as_deref()
        .and_then(|family| preferred.map(|p| p.contains(family)))
        .map(|hit| if hit { 1.0 } else { 0.0 })
        .unwrap_or(0.0);

    let rfm_norm = if world.max_rfm > 0 {
        (client.rfm_score as f64 / world.max_rfm as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let score = (weights.popularity * popularity
        + weights.price * price_fit
        + weights.family * family_fit
        + weights.rfm * rfm_norm)
        .clamp(0.0, 1.0);

    let reasons = ScoreReasons {
        schema_version: RUN_SCHEMA_VERSION,
        scenario,
        popularity,
        price_fit,
        family_fit,
        rfm_norm,
    };
    (score, reasons)
}

/// Short human explanation: the scenario plus the dominant weighted term.
fn explain(scenario: Scenario, weights: &ScoreWeights, reasons: &ScoreReasons) -> String {
    let contributions = [
        ("popularity", weights.popularity * reasons.popularity),
        ("price fit", weights.price * reasons.price_fit),
        ("family fit", weights.family * reasons.family_fit),
        ("rfm", weights.rfm * reasons.rfm_norm),
    ];
    let (term, _) = contributions
        .iter()
        .fold(("popularity", f64::NEG_INFINITY), |best, (name, value)| {
            if *value > best.1 {
                (name, *value)
            } else {
                best
            }
        });
    format!("{scenario}: driven by {term}")
}
