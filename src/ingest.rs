//! Dataset ingestion: one [`DocumentUnit`] per CSV row.
//!
//! The first record is the header. Every following record becomes a unit
//! whose text lists the row's fields as `column: value` lines in header
//! order. Fields are trimmed. A row whose field count differs from the
//! header fails the whole ingest; partial datasets are never indexed.

use datamat_core::models::DocumentUnit;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Read `path` and return its rows in file order.
pub fn ingest(path: &Path) -> Result<Vec<DocumentUnit>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| PipelineError::ingest(path, e))?;

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::ingest(path, e))?
        .clone();
    if headers.is_empty() || headers.iter().all(str::is_empty) {
        return Err(PipelineError::ingest(path, "missing header row"));
    }

    let mut units = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| PipelineError::ingest(path, e))?;
        units.push(DocumentUnit {
            index,
            text: serialize_row(&headers, &record),
        });
    }

    tracing::debug!(path = %path.display(), rows = units.len(), "ingested dataset");
    Ok(units)
}

/// Render one record as `column: value` lines.
pub fn serialize_row(headers: &csv::StringRecord, record: &csv::StringRecord) -> String {
    headers
        .iter()
        .zip(record.iter())
        .map(|(column, value)| format!("{}: {}", column, value))
        .collect::<Vec<_>>()
        .join("\n")
}
