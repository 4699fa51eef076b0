use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::error::{PipelineError, Result};

pub const BASE_CODE_FIELD: &str = "base_code";
pub const RATES_FIELD: &str = "conversion_rates";

/// Raw-layer view of one provider payload. Rates are kept unvalidated.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSnapshot {
    pub base_currency: String,
    pub as_of_date: NaiveDate,
    pub rates: BTreeMap<String, Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RateSnapshot {
    pub fn from_payload(as_of_date: NaiveDate, payload: &Value) -> Result<Self> {
        let object = payload.as_object().ok_or_else(|| PipelineError::MissingRequiredField {
            field: BASE_CODE_FIELD.to_string(),
        })?;

        let base_currency = object
            .get(BASE_CODE_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| PipelineError::MissingRequiredField {
                field: BASE_CODE_FIELD.to_string(),
            })?
            .to_ascii_uppercase();

        let rates = object
            .get(RATES_FIELD)
            .and_then(Value::as_object)
            .ok_or_else(|| PipelineError::MissingRequiredField {
                field: RATES_FIELD.to_string(),
            })?
            .iter()
            .map(|(code, rate)| (code.clone(), rate.clone()))
            .collect();

        Ok(Self {
            base_currency,
            as_of_date,
            rates,
            updated_at: provider_updated_at(object),
        })
    }

    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or_else(|| {
            self.as_of_date
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .unwrap_or_default()
        })
    }
}

fn provider_updated_at(object: &serde_json::Map<String, Value>) -> Option<DateTime<Utc>> {
    if let Some(secs) = object.get("time_last_update_unix").and_then(Value::as_i64) {
        if let Some(ts) = DateTime::from_timestamp(secs, 0) {
            return Some(ts);
        }
    }
    object
        .get("time_last_update_utc")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
