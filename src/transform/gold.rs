use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::layers::{DailyChange, GoldRecord, PartitionKey, SilverRecord};
use crate::storage::PartitionStore;
use crate::transform::tabular::{decode_silver, encode_gold};

#[derive(Debug, Clone, Serialize)]
pub struct EnrichOutcome {
    pub location: String,
    pub rows: usize,
    pub matched: usize,
    pub prior_date_found: bool,
}

/// Left join of today's rows against yesterday's on (base, currency).
/// Unmatched rows, and prior rates that are not strictly positive, yield
/// `DailyChange::NoPriorData`.
pub fn enrich(today: &[SilverRecord], yesterday: Option<&[SilverRecord]>) -> Vec<GoldRecord> {
    let previous: HashMap<(&str, &str), f64> = yesterday
        .unwrap_or_default()
        .iter()
        .filter(|r| r.rate.is_finite() && r.rate > 0.0)
        .map(|r| ((r.base_currency.as_str(), r.currency.as_str()), r.rate))
        .collect();

    today
        .iter()
        .map(|row| {
            let daily_change = previous
                .get(&(row.base_currency.as_str(), row.currency.as_str()))
                .map(|prev| DailyChange::Matched(pct_change(row.rate, *prev)))
                .unwrap_or(DailyChange::NoPriorData);
            GoldRecord {
                base_currency: row.base_currency.clone(),
                currency: row.currency.clone(),
                rate: row.rate,
                timestamp: row.timestamp,
                daily_change,
            }
        })
        .collect()
}

pub fn pct_change(today: f64, previous: f64) -> f64 {
    (today - previous) / previous * 100.0
}

pub fn enrich_date(store: &dyn PartitionStore, date: NaiveDate) -> Result<EnrichOutcome> {
    let today_key = PartitionKey::silver(date);
    let today = decode_silver(&store.read(&today_key)?)?;
    if today.is_empty() {
        return Err(PipelineError::InvalidSilverSchema {
            detail: format!("{} has no rows", store.location(&today_key)),
        });
    }

    let yesterday = load_previous_day(store, date);
    let records = enrich(&today, yesterday.as_deref());
    let matched = records.iter().filter(|r| r.daily_change.is_matched()).count();
    if yesterday.is_some() && matched < records.len() {
        warn!(
            "{} of {} currencies for {date} have no prior-day rate, daily change zero-filled",
            records.len() - matched,
            records.len()
        );
    }

    let bytes = encode_gold(&records)?;
    let location = store.write(&PartitionKey::gold(date), &bytes)?;
    info!("wrote {} gold rows to {location} ({matched} with prior-day change)", records.len());
    Ok(EnrichOutcome {
        location,
        rows: records.len(),
        matched,
        prior_date_found: yesterday.is_some(),
    })
}

fn load_previous_day(store: &dyn PartitionStore, date: NaiveDate) -> Option<Vec<SilverRecord>> {
    let previous_date = date.pred_opt()?;
    let key = PartitionKey::silver(previous_date);
    let bytes = match store.read_optional(&key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            warn!("no silver partition for {previous_date}, daily change zero-filled for {date}");
            return None;
        }
        Err(err) => {
            warn!("could not read {}: {err}; treating as no prior data", store.location(&key));
            return None;
        }
    };
    match decode_silver(&bytes) {
        Ok(rows) => Some(rows),
        Err(err) => {
            warn!("ignoring unusable prior-day partition {}: {err}", store.location(&key));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{enrich, enrich_date};
    use crate::error::PipelineError;
    use crate::layers::{DailyChange, PartitionKey, SilverRecord};
    use crate::storage::{MemoryStore, PartitionStore};
    use crate::transform::tabular::{decode_gold, encode_silver};

    const TOLERANCE: f64 = 1e-9;

    fn row(currency: &str, rate: f64) -> SilverRecord {
        SilverRecord {
            base_currency: "BRL".to_string(),
            currency: currency.to_string(),
            rate,
            timestamp: Utc.with_ymd_and_hms(2025, 9, 17, 0, 0, 1).single().expect("ts"),
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).expect("valid date")
    }

    #[test]
    fn no_history_zero_fills_every_row() {
        let gold = enrich(&[row("USD", 5.5), row("EUR", 5.7)], None);
        assert!(gold.iter().all(|r| r.daily_change == DailyChange::NoPriorData));
        assert!(gold.iter().all(|r| r.daily_change_pct() == 0.0));
    }

    #[test]
    fn computes_positive_and_negative_deltas() {
        let today = [row("USD", 5.5), row("EUR", 5.7)];
        let yesterday = [row("USD", 5.0), row("EUR", 6.0)];
        let gold = enrich(&today, Some(&yesterday[..]));

        assert!((gold[0].daily_change_pct() - 10.0).abs() < TOLERANCE);
        assert!((gold[1].daily_change_pct() + 5.0).abs() < TOLERANCE);
        assert!(gold.iter().all(|r| r.daily_change.is_matched()));
    }

    #[test]
    fn new_currency_keeps_row_with_no_prior_data() {
        let gold = enrich(&[row("USD", 5.5), row("GBP", 7.1)], Some(&[row("USD", 5.0)][..]));
        assert_eq!(gold.len(), 2);
        assert_eq!(gold[1].currency, "GBP");
        assert_eq!(gold[1].daily_change, DailyChange::NoPriorData);
    }

    #[test]
    fn invalid_prior_rate_falls_back_to_no_prior_data() {
        let gold = enrich(&[row("USD", 5.5), row("EUR", 5.7)], Some(&[row("USD", 0.0), row("EUR", -6.0)][..]));
        assert!(gold.iter().all(|r| r.daily_change == DailyChange::NoPriorData));
        assert!(gold.iter().all(|r| r.daily_change_pct().is_finite()));
    }

    #[test]
    fn unchanged_rate_is_matched_zero_not_missing() {
        let gold = enrich(&[row("USD", 5.0)], Some(&[row("USD", 5.0)][..]));
        assert_eq!(gold[0].daily_change, DailyChange::Matched(0.0));
    }

    #[test]
    fn enrich_date_uses_previous_calendar_day() {
        let store = MemoryStore::new();
        store
            .write(&PartitionKey::silver(date(16)), &encode_silver(&[row("USD", 5.0)]).expect("encode"))
            .expect("write");
        store
            .write(&PartitionKey::silver(date(17)), &encode_silver(&[row("USD", 5.5)]).expect("encode"))
            .expect("write");

        let outcome = enrich_date(&store, date(17)).expect("enrich");
        assert!(outcome.prior_date_found);
        assert_eq!(outcome.matched, 1);

        let rows = decode_gold(&store.read(&PartitionKey::gold(date(17))).expect("read"), "gold")
            .expect("decode");
        assert!((rows[0].daily_change_pct - 10.0).abs() < TOLERANCE);
    }

    #[test]
    fn corrupt_previous_day_degrades_to_zero_fill() {
        let store = MemoryStore::new();
        store
            .write(&PartitionKey::silver(date(16)), b"currency\nUSD\n")
            .expect("write");
        store
            .write(&PartitionKey::silver(date(17)), &encode_silver(&[row("USD", 5.5)]).expect("encode"))
            .expect("write");
        let outcome = enrich_date(&store, date(17)).expect("enrich");
        assert!(!outcome.prior_date_found);
        assert_eq!(outcome.matched, 0);
    }

    #[test]
    fn missing_today_partition_is_not_found() {
        let store = MemoryStore::new();
        let err = enrich_date(&store, date(17)).expect_err("missing silver");
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
        assert!(!store.exists(&PartitionKey::gold(date(17))).expect("exists"));
    }

    #[test]
    fn today_missing_columns_is_schema_error() {
        let store = MemoryStore::new();
        store
            .write(&PartitionKey::silver(date(17)), b"currency,rate\nUSD,5.5\n")
            .expect("write");
        let err = enrich_date(&store, date(17)).expect_err("schema");
        assert!(matches!(err, PipelineError::InvalidSilverSchema { .. }));
    }
}
