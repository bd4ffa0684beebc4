use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cuvee_core::{Result, RunId, TenantId};

/// Structured outcome of one ingestion run, exported as a sidecar
/// `report.json` next to the run's raw/staging/curated directories.
///
/// Blocking errors do not stop curated emission, but the loader consults
/// this report and refuses to promote tables named in `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub run_id: RunId,
    pub tenant_id: TenantId,
    /// SHA-256 over the sorted `name:hash` chain of the raw files; equal
    /// inputs produce equal versions across reruns.
    pub dataset_version: String,
    pub raw_files: BTreeMap<String, String>,
    pub staging_files: BTreeMap<String, String>,
    pub curated_files: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rows: BTreeMap<String, u64>,
}

impl IngestionReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes `report.json` into the run directory and returns its path.
    pub fn save(&self, run_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(run_dir)?;
        let path = run_dir.join("report.json");
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// True when a blocking contract error was recorded for the table.
    pub fn has_blocking_errors_for(&self, table: &str) -> bool {
        let prefix = format!("{table}:");
        self.errors.iter().any(|e| e.starts_with(&prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn report_roundtrips_and_flags_tables_with_errors() {
        let report = IngestionReport {
            run_id: RunId::generate(),
            tenant_id: TenantId(1),
            dataset_version: "abc".to_string(),
            raw_files: BTreeMap::new(),
            staging_files: BTreeMap::new(),
            curated_files: BTreeMap::new(),
            errors: vec!["sales: missing required column: client_code".to_string()],
            warnings: vec![],
            rows: BTreeMap::from([("sales".to_string(), 3)]),
        };

        let dir = TempDir::new().unwrap();
        let path = report.save(dir.path()).unwrap();
        let loaded = IngestionReport::load(&path).unwrap();

        assert_eq!(loaded.dataset_version, "abc");
        assert!(loaded.has_blocking_errors_for("sales"));
        assert!(!loaded.has_blocking_errors_for("clients"));
    }
}
