//! Curated → store loader.
//!
//! Reads curated CSVs, enforces the per-table required-column gate,
//! deduplicates on the natural key (keep last), resolves product labels to
//! canonical keys through the tenant's aliases, and upserts rows tagged
//! with the loader's tenant. Failures are table-scoped: one bad table never
//! aborts the others, the caller aggregates outcomes.

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{error, info, warn};

use crate::contract::table_for_stem;
use crate::csvio::{self, CsvTable};
use crate::report::IngestionReport;
use cuvee_core::text::{normalize_label, parse_sale_date};
use cuvee_core::{Error, Result, Store, TenantContext};

/// Per-table load result, mirrored into the pipeline report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub success: bool,
    pub table: String,
    pub rows_initial: u64,
    pub rows_duplicates: u64,
    pub rows_loaded: u64,
    pub resolved_aliases: u64,
    pub unknown_labels: BTreeMap<String, u64>,
    pub error_type: Option<String>,
}

impl LoadOutcome {
    fn failed(table: &str, error_type: &str) -> Self {
        Self {
            success: false,
            table: table.to_string(),
            rows_initial: 0,
            rows_duplicates: 0,
            rows_loaded: 0,
            resolved_aliases: 0,
            unknown_labels: BTreeMap::new(),
            error_type: Some(error_type.to_string()),
        }
    }
}

/// Aggregate over all table outcomes of one tenant load.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoadVerification {
    pub success: bool,
    pub total_success: u64,
    pub total_failed: u64,
    pub total_rows: u64,
    pub resolved_aliases: u64,
    pub unknown_labels: BTreeMap<String, u64>,
}

pub struct Loader {
    store: Store,
    ctx: TenantContext,
}

impl Loader {
    pub fn new(store: Store, ctx: TenantContext) -> Self {
        Self { store, ctx }
    }

    /// Loads one curated CSV into its table. Errors are captured in the
    /// outcome, not raised.
    pub async fn load_table(
        &self,
        table: &str,
        csv_path: &Path,
        isolate_schema: bool,
    ) -> LoadOutcome {
        match self.try_load(table, csv_path, isolate_schema).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    tenant_id = %self.ctx.tenant_id,
                    table,
                    error = %err,
                    "table load failed"
                );
                LoadOutcome::failed(table, err.kind())
            }
        }
    }

    /// Loads every curated file in the directory, routing by file stem.
    /// Tables with blocking contract errors in the ingestion report are
    /// refused. Returns a per-table outcome map.
    pub async fn load_all_curated(
        &self,
        curated_dir: &Path,
        report: Option<&IngestionReport>,
        isolate_schema: bool,
    ) -> BTreeMap<String, LoadOutcome> {
        let mut results = BTreeMap::new();

        let mut files: Vec<_> = match std::fs::read_dir(curated_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("csv"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(err) => {
                error!(dir = %curated_dir.display(), error = %err, "cannot read curated dir");
                return results;
            }
        };
        files.sort();

        for path in files {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(table) = table_for_stem(&stem) else {
                warn!(file = %path.display(), "unrecognized curated file skipped");
                continue;
            };

            if report
                .map(|r| r.has_blocking_errors_for(table))
                .unwrap_or(false)
            {
                warn!(
                    tenant_id = %self.ctx.tenant_id,
                    table,
                    "refusing to promote table with contract errors"
                );
                results.insert(table.to_string(), LoadOutcome::failed(table, "ContractError"));
                continue;
            }

            let outcome = self.load_table(table, &path, isolate_schema).await;
            results.insert(table.to_string(), outcome);
        }
        results
    }

    /// Aggregates per-table outcomes.
    pub fn verify(results: &BTreeMap<String, LoadOutcome>) -> LoadVerification {
        let mut verification = LoadVerification::default();
        for outcome in results.values() {
            if outcome.success {
                verification.total_success += 1;
            } else {
                verification.total_failed += 1;
            }
            verification.total_rows += outcome.rows_loaded;
            verification.resolved_aliases += outcome.resolved_aliases;
            for (label, count) in &outcome.unknown_labels {
                *verification.unknown_labels.entry(label.clone()).or_insert(0) += count;
            }
        }
        verification.success = verification.total_failed == 0;
        verification
    }

    async fn try_load(
        &self,
        table: &str,
        csv_path: &Path,
        isolate_schema: bool,
    ) -> Result<LoadOutcome> {
        let mut data = csvio::read_table(csv_path)?;
        let rows_initial = data.rows.len() as u64;

        let missing = missing_required_columns(table, &data);
        if !missing.is_empty() {
            return Err(Error::Contract {
                table: table.to_string(),
                missing_columns: missing,
            });
        }

        let rows_duplicates = dedup_keep_last(table, &mut data);

        let mut resolved_aliases = 0u64;
        let mut unknown_labels = BTreeMap::new();
        if table == "sales" {
            if !data.has_column("product_key") {
                data.add_column("product_key", "");
            }
            if data.has_column("product_label") {
                let alias_map = self.alias_map().await?;
                resolve_labels(&mut data, &alias_map, &mut resolved_aliases, &mut unknown_labels);
                data.drop_column("product_label");
            }
        }

        let target = if isolate_schema {
            format!("{}_{}", table, self.ctx.tenant_id)
        } else {
            table.to_string()
        };

        // The whole table goes in as one transaction; a transient storage
        // failure rolls back and is retried once.
        let rows_loaded = cuvee_core::with_retry("load_table", || {
            self.insert_all(table, &target, &data, isolate_schema)
        })
        .await?;

        info!(
            tenant_id = %self.ctx.tenant_id,
            table = %target,
            rows_initial,
            rows_duplicates,
            rows_loaded,
            resolved_aliases,
            "table loaded"
        );
        Ok(LoadOutcome {
            success: true,
            table: target,
            rows_initial,
            rows_duplicates,
            rows_loaded,
            resolved_aliases,
            unknown_labels,
            error_type: None,
        })
    }

    async fn insert_all(
        &self,
        table: &str,
        target: &str,
        data: &CsvTable,
        isolate_schema: bool,
    ) -> Result<u64> {
        let mut tx = self.store.pool().begin().await?;
        if isolate_schema {
            ensure_isolated_table(&mut tx, table, target).await?;
        }
        let rows_loaded = match table {
            "clients" => self.insert_clients(&mut tx, target, data).await?,
            "products" => self.insert_products(&mut tx, target, data).await?,
            "sales" => self.insert_sales(&mut tx, target, data).await?,
            other => {
                return Err(Error::internal(format!("unknown load target: {other}")));
            }
        };
        tx.commit().await?;
        Ok(rows_loaded)
    }

    /// `label_norm -> product_key`. Falls back to normalized product names
    /// when the tenant has no aliases yet.
    async fn alias_map(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT label_norm, product_key FROM product_alias WHERE tenant_id = ?1",
        )
        .bind(self.ctx.tenant_id)
        .fetch_all(self.store.pool())
        .await?;
        if !rows.is_empty() {
            return Ok(rows.into_iter().collect());
        }

        let products: Vec<(String, String)> =
            sqlx::query_as("SELECT name, product_key FROM products WHERE tenant_id = ?1")
                .bind(self.ctx.tenant_id)
                .fetch_all(self.store.pool())
                .await?;
        Ok(products
            .into_iter()
            .map(|(name, key)| (normalize_label(&name), key))
            .collect())
    }

    async fn insert_clients(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        target: &str,
        data: &CsvTable,
    ) -> Result<u64> {
        let sql = format!(
            r#"
            INSERT INTO {target} (tenant_id, client_code, name, email, budget_band, rfm_segment)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (tenant_id, client_code)
            DO UPDATE SET name = excluded.name,
                          email = excluded.email,
                          budget_band = excluded.budget_band,
                          rfm_segment = excluded.rfm_segment
            "#
        );
        let mut loaded = 0u64;
        for row in &data.rows {
            sqlx::query(&sql)
                .bind(self.ctx.tenant_id)
                .bind(data.value(row, "client_code").unwrap_or_default())
                .bind(data.value(row, "name"))
                .bind(data.value(row, "email"))
                .bind(data.value(row, "budget_band"))
                .bind(data.value(row, "rfm_segment"))
                .execute(&mut **tx)
                .await?;
            loaded += 1;
        }
        Ok(loaded)
    }

    async fn insert_products(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        target: &str,
        data: &CsvTable,
    ) -> Result<u64> {
        let sql = format!(
            r#"
            INSERT INTO {target} (tenant_id, product_key, name, family_crm, sub_family,
                                  cepage, sucrosite_niveau, price_ttc, margin, premium_tier,
                                  price_band, global_popularity_score, season_tags)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, COALESCE(?12, 0.0), ?13)
            ON CONFLICT (tenant_id, product_key)
            DO UPDATE SET name = excluded.name,
                          family_crm = excluded.family_crm,
                          sub_family = excluded.sub_family,
                          cepage = excluded.cepage,
                          sucrosite_niveau = excluded.sucrosite_niveau,
                          price_ttc = excluded.price_ttc,
                          margin = excluded.margin,
                          premium_tier = excluded.premium_tier,
                          price_band = excluded.price_band,
                          global_popularity_score = excluded.global_popularity_score,
                          season_tags = excluded.season_tags
            "#
        );
        let mut loaded = 0u64;
        for row in &data.rows {
            sqlx::query(&sql)
                .bind(self.ctx.tenant_id)
                .bind(data.value(row, "product_key").unwrap_or_default())
                .bind(data.value(row, "name").unwrap_or_default())
                .bind(data.value(row, "family_crm"))
                .bind(data.value(row, "sub_family"))
                .bind(data.value(row, "cepage"))
                .bind(data.value(row, "sucrosite_niveau"))
                .bind(parse_f64(data.value(row, "price_ttc")))
                .bind(parse_f64(data.value(row, "margin")))
                .bind(data.value(row, "premium_tier"))
                .bind(data.value(row, "price_band"))
                .bind(parse_f64(data.value(row, "global_popularity_score")))
                .bind(data.value(row, "season_tags"))
                .execute(&mut **tx)
                .await?;
            loaded += 1;
        }
        Ok(loaded)
    }

    async fn insert_sales(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        target: &str,
        data: &CsvTable,
    ) -> Result<u64> {
        let sql = format!(
            r#"
            INSERT INTO {target} (tenant_id, document_id, product_key, client_code,
                                  quantity, amount, sale_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (tenant_id, document_id, product_key, client_code)
            DO UPDATE SET quantity = excluded.quantity,
                          amount = excluded.amount,
                          sale_date = excluded.sale_date
            "#
        );
        let mut loaded = 0u64;
        for row in &data.rows {
            sqlx::query(&sql)
                .bind(self.ctx.tenant_id)
                .bind(data.value(row, "document_id").unwrap_or_default())
                .bind(data.value(row, "product_key"))
                .bind(data.value(row, "client_code").unwrap_or_default())
                .bind(parse_f64(data.value(row, "quantity")))
                .bind(parse_f64(data.value(row, "amount")))
                .bind(data.value(row, "sale_date").and_then(parse_sale_date))
                .execute(&mut **tx)
                .await?;
            loaded += 1;
        }
        Ok(loaded)
    }
}

/// The loader's gate is narrower than the ingestion contract: only the
/// columns the store insert actually needs.
fn missing_required_columns(table: &str, data: &CsvTable) -> Vec<String> {
    let mut missing = Vec::new();
    match table {
        "clients" => {
            if !data.has_column("client_code") {
                missing.push("client_code".to_string());
            }
        }
        "products" => {
            for col in ["product_key", "name"] {
                if !data.has_column(col) {
                    missing.push(col.to_string());
                }
            }
        }
        "sales" => {
            for col in ["document_id", "client_code"] {
                if !data.has_column(col) {
                    missing.push(col.to_string());
                }
            }
            if !data.has_column("product_key") && !data.has_column("product_label") {
                missing.push("product_key/product_label".to_string());
            }
        }
        _ => {}
    }
    missing
}

/// Keep-last deduplication on the table's natural key. Returns the number
/// of rows dropped.
fn dedup_keep_last(table: &str, data: &mut CsvTable) -> u64 {
    let key_columns: &[&str] = match table {
        "sales" => &["document_id", "product_key", "client_code"],
        "clients" => &["client_code"],
        "products" => &["product_key"],
        _ => return 0,
    };
    // Only dedup when every key column is present (sales files carrying
    // labels instead of keys are deduplicated after resolution by upsert).
    if key_columns.iter().any(|col| !data.has_column(col)) {
        return 0;
    }

    let mut last_index: HashMap<Vec<String>, usize> = HashMap::new();
    for (idx, row) in data.rows.iter().enumerate() {
        let key: Vec<String> = key_columns
            .iter()
            .map(|col| data.value(row, col).unwrap_or_default().to_string())
            .collect();
        last_index.insert(key, idx);
    }

    let before = data.rows.len();
    let keep: Vec<bool> = data
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let key: Vec<String> = key_columns
                .iter()
                .map(|col| data.value(row, col).unwrap_or_default().to_string())
                .collect();
            last_index.get(&key) == Some(&idx)
        })
        .collect();
    let mut iter = keep.iter();
    data.rows.retain(|_| *iter.next().unwrap());
    (before - data.rows.len()) as u64
}

/// Fills empty `product_key` cells from the alias map; unresolved labels
/// are counted but the rows are kept.
fn resolve_labels(
    data: &mut CsvTable,
    alias_map: &HashMap<String, String>,
    resolved: &mut u64,
    unknown: &mut BTreeMap<String, u64>,
) {
    let key_idx = data.column_index("product_key").expect("ensured by caller");
    let label_idx = data.column_index("product_label").expect("checked by caller");

    for row in &mut data.rows {
        if !row[key_idx].is_empty() {
            continue;
        }
        let label = row[label_idx].trim();
        if label.is_empty() {
            continue;
        }
        let norm = normalize_label(label);
        match alias_map.get(&norm) {
            Some(product_key) => {
                row[key_idx] = product_key.clone();
                *resolved += 1;
            }
            None => {
                *unknown.entry(norm).or_insert(0) += 1;
            }
        }
    }
}

/// Creates the per-tenant shadow table for `isolate_schema` loads: same
/// columns as the base table plus a unique index on the natural key so
/// upserts keep working.
async fn ensure_isolated_table(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    target: &str,
) -> Result<()> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {target} AS SELECT * FROM {table} WHERE 0"
    ))
    .execute(&mut **tx)
    .await?;

    let key_columns = match table {
        "sales" => "tenant_id, document_id, product_key, client_code",
        "clients" => "tenant_id, client_code",
        "products" => "tenant_id, product_key",
        _ => return Ok(()),
    };
    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_{target} ON {target} ({key_columns})"
    ))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value.and_then(|v| v.trim().parse::<f64>().ok())
}
