//! CSV reading and writing for the file pipeline. UTF-8, header row
//! required on read, `QUOTE_NONNUMERIC` on write.

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use std::path::Path;

use cuvee_core::{Error, Result};

/// In-memory CSV table: normalized headers plus string cells. The pipeline
/// treats everything as text until the loader types it.
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell value by column name; empty cells come back as `None`.
    pub fn value<'a>(&self, row: &'a [String], name: &str) -> Option<&'a str> {
        self.column_index(name)
            .and_then(|idx| row.get(idx))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Appends a column, filling existing rows with the given default.
    pub fn add_column(&mut self, name: &str, default: &str) {
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(default.to_string());
        }
    }

    /// Drops a column by name; no-op when absent.
    pub fn drop_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.headers.remove(idx);
            for row in &mut self.rows {
                if idx < row.len() {
                    row.remove(idx);
                }
            }
        }
    }
}

/// Reads a CSV file into memory. The header row is mandatory; ragged rows
/// are tolerated and padded with empty cells.
pub fn read_table(path: &Path) -> Result<CsvTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::internal(format!("csv open failed for {}: {e}", path.display())))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::internal(format!("csv header read failed for {}: {e}", path.display())))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| Error::internal(format!("csv read failed for {}: {e}", path.display())))?;
        let mut row: Vec<String> = record.iter().map(|v| v.trim().to_string()).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

/// Writes a table, quoting non-numeric fields, creating parent directories.
pub fn write_table(path: &Path, table: &CsvTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_path(path)
        .map_err(|e| Error::internal(format!("csv open failed for {}: {e}", path.display())))?;

    writer
        .write_record(&table.headers)
        .map_err(|e| Error::internal(format!("csv write failed for {}: {e}", path.display())))?;
    for row in &table.rows {
        writer
            .write_record(row)
            .map_err(|e| Error::internal(format!("csv write failed for {}: {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| Error::internal(format!("csv flush failed for {}: {e}", path.display())))?;
    Ok(())
}
