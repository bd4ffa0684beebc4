//! RAW → STAGING → CURATED ingestion runner.
//!
//! Each run gets a fresh `run_id` and its own directory tree under
//! `{data_root}/{tenant_id}/runs/{run_id}/`. Raw files are archived
//! immutably, normalized into staging, validated against the data contract
//! and emitted as curated CSVs together with a structured report. Blocking
//! errors are collected, never raised; curated output is still written so
//! operators can inspect it, and the loader refuses the affected tables.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::contract::{contract_for, table_for_stem};
use crate::csvio::{self, CsvTable};
use crate::report::IngestionReport;
use cuvee_core::text::{normalize_column, normalize_key, parse_sale_date};
use cuvee_core::{Error, Result, RunId, TenantContext};

pub struct IngestionRunner {
    data_root: PathBuf,
}

impl IngestionRunner {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn run_dir(&self, ctx: &TenantContext, run_id: &RunId) -> PathBuf {
        self.data_root
            .join(ctx.tenant_id.to_string())
            .join("runs")
            .join(run_id.as_str())
    }

    /// Ingests every `*.csv` in `source_dir` for the tenant and writes the
    /// sidecar `report.json`. Returns the report.
    pub async fn ingest_dir(
        &self,
        ctx: &TenantContext,
        source_dir: &Path,
    ) -> Result<IngestionReport> {
        let run_id = RunId::generate();
        let run_dir = self.run_dir(ctx, &run_id);
        let raw_dir = run_dir.join("raw");
        let staging_dir = run_dir.join("staging");
        let curated_dir = run_dir.join("curated");

        let raw_files = self.archive_raw(source_dir, &raw_dir).await?;
        if raw_files.is_empty() {
            warn!(tenant_id = %ctx.tenant_id, source = %source_dir.display(), "no csv files found");
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut staging_files = BTreeMap::new();
        let mut curated_files = BTreeMap::new();
        let mut rows = BTreeMap::new();

        for (file_name, raw_path) in &raw_files {
            let stem = Path::new(file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(table) = table_for_stem(&stem) else {
                warnings.push(format!("unrecognized file skipped: {file_name}"));
                continue;
            };

            let mut data = csvio::read_table(raw_path)?;
            normalize_headers(&mut data);
            match table {
                "clients" => normalize_clients(&mut data),
                "sales" => normalize_sales(&mut data, &mut warnings),
                _ => {}
            }

            rows.insert(table.to_string(), data.rows.len() as u64);
            if let Some(contract) = contract_for(table) {
                let (table_errors, table_warnings) = contract.validate(&data.headers);
                errors.extend(table_errors);
                warnings.extend(table_warnings);
            }

            let staging_path = staging_dir.join(format!("{table}.csv"));
            csvio::write_table(&staging_path, &data)?;
            staging_files.insert(table.to_string(), staging_path.display().to_string());

            let curated_path = curated_dir.join(format!("{table}_curated.csv"));
            csvio::write_table(&curated_path, &data)?;
            curated_files.insert(table.to_string(), curated_path.display().to_string());
        }

        let dataset_version = dataset_version(&raw_files)?;
        let report = IngestionReport {
            run_id: run_id.clone(),
            tenant_id: ctx.tenant_id,
            dataset_version,
            raw_files: raw_files
                .iter()
                .map(|(name, path)| (name.clone(), path.display().to_string()))
                .collect(),
            staging_files,
            curated_files,
            errors,
            warnings,
            rows,
        };
        report.save(&run_dir)?;

        info!(
            tenant_id = %ctx.tenant_id,
            run_id = %run_id,
            files = report.raw_files.len(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "ingestion run complete"
        );
        Ok(report)
    }

    /// Copies source CSVs into the immutable RAW archive. Overwriting an
    /// existing RAW file is an error.
    pub async fn archive_raw(
        &self,
        source_dir: &Path,
        raw_dir: &Path,
    ) -> Result<BTreeMap<String, PathBuf>> {
        tokio::fs::create_dir_all(raw_dir).await?;

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(source_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if path.is_file() && is_csv {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        let mut copied = BTreeMap::new();
        for name in names {
            let target = raw_dir.join(&name);
            if target.exists() {
                return Err(Error::Conflict(format!(
                    "RAW file already exists (immutable): {}",
                    target.display()
                )));
            }
            tokio::fs::copy(source_dir.join(&name), &target).await?;
            copied.insert(name, target);
        }
        Ok(copied)
    }
}

fn normalize_headers(data: &mut CsvTable) {
    for header in &mut data.headers {
        *header = normalize_column(header);
    }
}

fn normalize_clients(data: &mut CsvTable) {
    if let Some(idx) = data.column_index("client_code") {
        for row in &mut data.rows {
            row[idx] = normalize_key(&row[idx]);
        }
    }
}

fn normalize_sales(data: &mut CsvTable, warnings: &mut Vec<String>) {
    if let Some(idx) = data.column_index("client_code") {
        for row in &mut data.rows {
            row[idx] = normalize_key(&row[idx]);
        }
    }

    if let Some(idx) = data.column_index("sale_date") {
        let mut unparseable = 0u64;
        for row in &mut data.rows {
            let raw = row[idx].clone();
            match parse_sale_date(&raw) {
                Some(date) => row[idx] = date.format("%Y-%m-%d").to_string(),
                None => {
                    if !raw.is_empty() {
                        unparseable += 1;
                    }
                    row[idx] = String::new();
                }
            }
        }
        if unparseable > 0 {
            warnings.push(format!(
                "sales: {unparseable} unparseable sale_date value(s) set to null"
            ));
        }
    }

    if !data.has_column("quantity") {
        data.add_column("quantity", "1");
    }
}

/// Stable content hash over the raw inputs: SHA-256 of the sorted
/// `name:sha256(bytes)` chain.
fn dataset_version(raw_files: &BTreeMap<String, PathBuf>) -> Result<String> {
    let mut parts = Vec::with_capacity(raw_files.len());
    for (name, path) in raw_files {
        let bytes = std::fs::read(path)?;
        let digest = Sha256::digest(&bytes);
        parts.push(format!("{name}:{digest:x}"));
    }
    let chain = parts.join("|");
    Ok(format!("{:x}", Sha256::digest(chain.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuvee_core::TenantId;
    use tempfile::TempDir;

    fn write_source(dir: &Path) {
        std::fs::write(
            dir.join("clients.csv"),
            "Client_Code,Name,Email\n C1 ,Cave Martin,martin@example.com\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("sales.csv"),
            "document_id,product_label,client_code,quantity,amount,Sale Date\nINV-1,Pinot Noir,C1,1,10,15/03/2024\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn ingestion_normalizes_headers_dates_and_keys() {
        let source = TempDir::new().unwrap();
        let data_root = TempDir::new().unwrap();
        write_source(source.path());

        let runner = IngestionRunner::new(data_root.path());
        let ctx = TenantContext::new(TenantId(1));
        let report = runner.ingest_dir(&ctx, source.path()).await.unwrap();

        assert!(report.errors.is_empty());
        assert_eq!(report.rows.get("sales"), Some(&1));

        let curated = csvio::read_table(Path::new(&report.curated_files["sales"])).unwrap();
        assert!(curated.has_column("sale_date"));
        let row = &curated.rows[0];
        assert_eq!(curated.value(row, "sale_date"), Some("2024-03-15"));
        assert_eq!(curated.value(row, "client_code"), Some("c1"));
    }

    #[tokio::test]
    async fn missing_required_column_is_a_blocking_error() {
        let source = TempDir::new().unwrap();
        let data_root = TempDir::new().unwrap();
        std::fs::write(source.path().join("clients.csv"), "name,email\nA,a@x.fr\n").unwrap();

        let runner = IngestionRunner::new(data_root.path());
        let ctx = TenantContext::new(TenantId(1));
        let report = runner.ingest_dir(&ctx, source.path()).await.unwrap();

        assert!(report.has_blocking_errors_for("clients"));
        // Curated output is still written for inspection.
        assert!(report.curated_files.contains_key("clients"));
    }

    #[tokio::test]
    async fn raw_archive_is_immutable() {
        let source = TempDir::new().unwrap();
        let data_root = TempDir::new().unwrap();
        write_source(source.path());

        let runner = IngestionRunner::new(data_root.path());
        let raw_dir = data_root.path().join("raw");
        runner.archive_raw(source.path(), &raw_dir).await.unwrap();
        let err = runner
            .archive_raw(source.path(), &raw_dir)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn dataset_version_is_stable_across_reruns() {
        let source = TempDir::new().unwrap();
        let data_root = TempDir::new().unwrap();
        write_source(source.path());

        let runner = IngestionRunner::new(data_root.path());
        let ctx = TenantContext::new(TenantId(1));
        let first = runner.ingest_dir(&ctx, source.path()).await.unwrap();
        let second = runner.ingest_dir(&ctx, source.path()).await.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.dataset_version, second.dataset_version);
    }
}
