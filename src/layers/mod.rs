pub mod snapshot;

use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub use snapshot::RateSnapshot;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Raw,
    Silver,
    Gold,
    Reports,
    ReportAudit,
}

impl Layer {
    pub fn dir(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Reports | Self::ReportAudit => "reports",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Raw => "json",
            Self::Silver | Self::Gold => "csv",
            Self::Reports => "txt",
            Self::ReportAudit => "json",
        }
    }
}

impl Display for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir())
    }
}

/// Identity of one persisted file. The date string is the partition key for
/// raw/silver/gold; reports append the base currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub layer: Layer,
    pub name: String,
}

impl PartitionKey {
    pub fn raw(date: NaiveDate) -> Self {
        Self::dated(Layer::Raw, date)
    }

    pub fn silver(date: NaiveDate) -> Self {
        Self::dated(Layer::Silver, date)
    }

    pub fn gold(date: NaiveDate) -> Self {
        Self::dated(Layer::Gold, date)
    }

    pub fn report(date: NaiveDate, base_currency: &str) -> Self {
        Self {
            layer: Layer::Reports,
            name: report_name(date, base_currency),
        }
    }

    pub fn report_audit(date: NaiveDate, base_currency: &str) -> Self {
        Self {
            layer: Layer::ReportAudit,
            name: report_name(date, base_currency),
        }
    }

    fn dated(layer: Layer, date: NaiveDate) -> Self {
        Self {
            layer,
            name: format_date(date),
        }
    }

    pub fn relative_path(&self) -> String {
        format!("{}/{}.{}", self.layer.dir(), self.name, self.layer.extension())
    }

    pub fn date(&self) -> Option<NaiveDate> {
        let prefix = self.name.get(..10)?;
        NaiveDate::parse_from_str(prefix, DATE_FORMAT).ok()
    }

    /// True for names of the form `{date}_{base}_summary`.
    pub fn is_dated_report(&self) -> bool {
        if self.date().is_none() {
            return false;
        }
        self.name
            .get(10..)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix("_summary"))
            .is_some_and(|base| !base.is_empty() && !base.contains('_'))
    }
}

fn report_name(date: NaiveDate, base_currency: &str) -> String {
    format!("{}_{base_currency}_summary", format_date(date))
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.relative_path())
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, PipelineError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| PipelineError::InvalidConfig(format!("invalid date `{raw}` (want YYYY-MM-DD): {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SilverRecord {
    pub base_currency: String,
    pub currency: String,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
}

pub const SILVER_COLUMNS: [&str; 4] = ["base_currency", "currency", "rate", "timestamp"];
pub const GOLD_COLUMNS: [&str; 5] = [
    "base_currency",
    "currency",
    "rate",
    "timestamp",
    "daily_change_pct",
];

/// Outcome of the day-over-day join for one currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pct", rename_all = "snake_case")]
pub enum DailyChange {
    Matched(f64),
    NoPriorData,
}

impl DailyChange {
    /// Persisted value. Missing prior data is zero-filled here and nowhere else.
    pub fn pct(self) -> f64 {
        match self {
            Self::Matched(pct) => pct,
            Self::NoPriorData => 0.0,
        }
    }

    pub fn is_matched(self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoldRecord {
    pub base_currency: String,
    pub currency: String,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
    pub daily_change: DailyChange,
}

impl GoldRecord {
    pub fn daily_change_pct(&self) -> f64 {
        self.daily_change.pct()
    }
}

/// Flat gold row as stored and read back by downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoldRow {
    pub base_currency: String,
    pub currency: String,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
    pub daily_change_pct: f64,
}

impl From<&GoldRecord> for GoldRow {
    fn from(record: &GoldRecord) -> Self {
        Self {
            base_currency: record.base_currency.clone(),
            currency: record.currency.clone(),
            rate: record.rate,
            timestamp: record.timestamp,
            daily_change_pct: record.daily_change_pct(),
        }
    }
}
