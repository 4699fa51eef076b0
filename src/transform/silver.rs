use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::normalize_code;
use crate::error::{PipelineError, Result};
use crate::ingest::load_raw;
use crate::layers::{PartitionKey, RateSnapshot, SilverRecord};
use crate::storage::PartitionStore;
use crate::transform::tabular::encode_silver;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterReport {
    pub kept: usize,
    pub non_positive: usize,
    pub non_numeric: usize,
    pub not_allowed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    pub location: String,
    pub rows: usize,
    pub filters: FilterReport,
}

pub fn transform(
    snapshot: &RateSnapshot,
    allowed_currencies: &BTreeSet<String>,
) -> Result<Vec<SilverRecord>> {
    transform_with_report(snapshot, allowed_currencies).map(|(records, _)| records)
}

pub fn transform_with_report(
    snapshot: &RateSnapshot,
    allowed_currencies: &BTreeSet<String>,
) -> Result<(Vec<SilverRecord>, FilterReport)> {
    if snapshot.rates.is_empty() {
        return Err(PipelineError::NoValidRates {
            base_currency: snapshot.base_currency.clone(),
            detail: "provider returned an empty rates mapping".to_string(),
        });
    }

    let timestamp = snapshot.effective_timestamp();
    let mut report = FilterReport::default();
    let mut by_currency: BTreeMap<String, SilverRecord> = BTreeMap::new();

    for (code, raw_rate) in &snapshot.rates {
        let currency = normalize_code(code);
        if !allowed_currencies.contains(&currency) {
            report.not_allowed += 1;
            continue;
        }
        let Some(rate) = numeric_rate(raw_rate) else {
            report.non_numeric += 1;
            continue;
        };
        if rate <= 0.0 {
            report.non_positive += 1;
            continue;
        }
        by_currency.entry(currency.clone()).or_insert(SilverRecord {
            base_currency: snapshot.base_currency.clone(),
            currency,
            rate,
            timestamp,
        });
    }
    report.kept = by_currency.len();

    if by_currency.is_empty() {
        return Err(PipelineError::NoValidRates {
            base_currency: snapshot.base_currency.clone(),
            detail: format!(
                "none of {} provider rates passed filters ({} not in target set, {} non-numeric, {} non-positive)",
                snapshot.rates.len(),
                report.not_allowed,
                report.non_numeric,
                report.non_positive
            ),
        });
    }

    Ok((by_currency.into_values().collect(), report))
}

/// Raw partition for `date` -> silver partition for `date`. Overwrites any
/// existing silver file; writes nothing on failure.
pub fn transform_date(
    store: &dyn PartitionStore,
    date: NaiveDate,
    base_currency: &str,
    allowed_currencies: &BTreeSet<String>,
) -> Result<TransformOutcome> {
    let payload = load_raw(store, date)?;
    let snapshot = RateSnapshot::from_payload(date, &payload)?;
    if snapshot.base_currency != base_currency {
        warn!(
            "raw snapshot for {date} has base {} but configured base is {base_currency}",
            snapshot.base_currency
        );
    }

    let (records, filters) = transform_with_report(&snapshot, allowed_currencies)?;
    debug!(
        "silver filters for {date}: kept={} not_allowed={} non_numeric={} non_positive={}",
        filters.kept, filters.not_allowed, filters.non_numeric, filters.non_positive
    );
    if filters.non_positive > 0 || filters.non_numeric > 0 {
        warn!(
            "dropped {} invalid rates from raw snapshot for {date}",
            filters.non_positive + filters.non_numeric
        );
    }

    let bytes = encode_silver(&records)?;
    let location = store.write(&PartitionKey::silver(date), &bytes)?;
    info!("wrote {} silver rows to {location}", records.len());
    Ok(TransformOutcome {
        location,
        rows: records.len(),
        filters,
    })
}

fn numeric_rate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}
