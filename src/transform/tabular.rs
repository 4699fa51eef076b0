use std::collections::BTreeSet;

use csv::{ReaderBuilder, StringRecord, Writer};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::layers::{GoldRecord, GoldRow, SilverRecord, GOLD_COLUMNS, SILVER_COLUMNS};

pub fn encode_silver(records: &[SilverRecord]) -> Result<Vec<u8>> {
    encode_rows(records)
}

pub fn encode_gold(records: &[GoldRecord]) -> Result<Vec<u8>> {
    let rows = records.iter().map(GoldRow::from).collect::<Vec<_>>();
    encode_rows(&rows)
}

pub fn decode_silver(bytes: &[u8]) -> Result<Vec<SilverRecord>> {
    let records: Vec<SilverRecord> = decode_rows(bytes, &SILVER_COLUMNS)
        .map_err(|detail| PipelineError::InvalidSilverSchema { detail })?;

    let mut seen = BTreeSet::new();
    for record in &records {
        if !seen.insert(record.currency.as_str()) {
            return Err(PipelineError::InvalidSilverSchema {
                detail: format!("duplicate currency {}", record.currency),
            });
        }
    }
    Ok(records)
}

pub fn decode_gold(bytes: &[u8], location: &str) -> Result<Vec<GoldRow>> {
    decode_rows(bytes, &GOLD_COLUMNS).map_err(|detail| PipelineError::malformed(location, detail))
}

fn encode_rows<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = Writer::from_writer(vec![]);
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| PipelineError::malformed("csv encoder", e))?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::malformed("csv encoder", e))
}

fn decode_rows<T: DeserializeOwned>(
    bytes: &[u8],
    required: &[&str],
) -> std::result::Result<Vec<T>, String> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| format!("unreadable header row: {e}"))?
        .clone();
    let missing = missing_columns(&headers, required);
    if !missing.is_empty() {
        return Err(format!("missing columns: {}", missing.join(", ")));
    }

    let mut rows = Vec::new();
    for (idx, row) in reader.deserialize::<T>().enumerate() {
        rows.push(row.map_err(|e| format!("row {}: {e}", idx + 1))?);
    }
    Ok(rows)
}

fn missing_columns(headers: &StringRecord, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|col| !headers.iter().any(|h| h.trim() == **col))
        .map(|col| col.to_string())
        .collect()
}
