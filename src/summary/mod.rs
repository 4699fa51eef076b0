pub mod openai;
pub mod prompt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::layers::{format_date, GoldRow, Layer, PartitionKey};
use crate::storage::PartitionStore;
use crate::transform::tabular::decode_gold;

pub use openai::OpenAiSummaryGenerator;
pub use prompt::{build_prompt, rank_movers, render_markdown_table};

const HIDDEN_PROMPT: &str = "<hidden>";

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest {
    pub date: NaiveDate,
    pub base_currency: String,
    pub top_n: usize,
    pub movers: Vec<GoldRow>,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedSummary {
    pub text: String,
    pub model: Option<String>,
    pub raw_response: Option<Value>,
}

impl From<String> for GeneratedSummary {
    fn from(text: String) -> Self {
        Self {
            text,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &SummaryRequest) -> Result<GeneratedSummary>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryAudit {
    pub date: String,
    pub created_at_utc: DateTime<Utc>,
    pub base_currency: String,
    pub provider: String,
    pub model: Option<String>,
    pub top_n: usize,
    pub prompt: String,
    pub response_text: String,
    pub raw_response: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryOutcome {
    pub location: String,
    pub generated: bool,
    pub audit_location: Option<String>,
}

pub fn load_gold(store: &dyn PartitionStore, date: NaiveDate) -> Result<Vec<GoldRow>> {
    let key = PartitionKey::gold(date);
    let bytes = store.read(&key)?;
    decode_gold(&bytes, &store.location(&key))
}

pub fn build_request(
    rows: &[GoldRow],
    date: NaiveDate,
    base_currency: &str,
    top_n: usize,
) -> Result<SummaryRequest> {
    let scoped = rows
        .iter()
        .filter(|row| row.base_currency == base_currency)
        .cloned()
        .collect::<Vec<_>>();
    if scoped.is_empty() {
        return Err(PipelineError::Summary(format!(
            "gold partition for {date} has no rows for base {base_currency}"
        )));
    }
    let movers = rank_movers(&scoped, top_n);
    let prompt = build_prompt(&movers, date, base_currency, top_n);
    Ok(SummaryRequest {
        date,
        base_currency: base_currency.to_string(),
        top_n,
        movers,
        prompt,
    })
}

/// Reads the gold partition, asks the generator for a narrative and stores it
/// at `reports/{date}_{base}_summary.txt`. An existing report is left alone.
pub async fn summarize_date(
    store: &dyn PartitionStore,
    generator: &dyn SummaryGenerator,
    date: NaiveDate,
    base_currency: &str,
    top_n: usize,
    log_prompts: bool,
) -> Result<SummaryOutcome> {
    let report_key = PartitionKey::report(date, base_currency);
    if store.exists(&report_key)? {
        let location = store.location(&report_key);
        info!("summary already present at {location}, skipping");
        return Ok(SummaryOutcome {
            location,
            generated: false,
            audit_location: None,
        });
    }

    let rows = load_gold(store, date)?;
    let request = build_request(&rows, date, base_currency, top_n)?;
    info!(
        "requesting summary from {} for {date} ({} movers)",
        generator.name(),
        request.movers.len()
    );
    let generated = generator.generate(&request).await?;
    let text = generated.text.trim();
    if text.is_empty() {
        return Err(PipelineError::Summary(format!(
            "{} returned an empty summary",
            generator.name()
        )));
    }

    let audit = SummaryAudit {
        date: format_date(date),
        created_at_utc: Utc::now(),
        base_currency: base_currency.to_string(),
        provider: generator.name().to_string(),
        model: generated.model.clone(),
        top_n,
        prompt: if log_prompts {
            request.prompt.clone()
        } else {
            HIDDEN_PROMPT.to_string()
        },
        response_text: text.to_string(),
        raw_response: generated.raw_response.clone(),
    };
    let audit_key = PartitionKey::report_audit(date, base_currency);
    let audit_bytes = serde_json::to_vec_pretty(&audit)
        .map_err(|e| PipelineError::malformed(audit_key.relative_path(), e))?;
    // Narrative last; its presence marks the date as summarized.
    let audit_location = store.write(&audit_key, &audit_bytes)?;
    let location = store.write(&report_key, text.as_bytes())?;
    info!("summary saved to {location} (audit {audit_location})");
    Ok(SummaryOutcome {
        location,
        generated: true,
        audit_location: Some(audit_location),
    })
}

/// Most recent `{date}_{base}_summary` report, optionally restricted to one
/// date. Other files in the reports directory are ignored.
pub fn latest_report(
    store: &dyn PartitionStore,
    date: Option<NaiveDate>,
) -> Result<Option<(PartitionKey, String)>> {
    let Some(key) = store
        .list(Layer::Reports)?
        .into_iter()
        .filter(PartitionKey::is_dated_report)
        .filter(|key| date.map_or(true, |d| key.date() == Some(d)))
        .max_by(|a, b| (a.date(), &a.name).cmp(&(b.date(), &b.name)))
    else {
        return Ok(None);
    };
    let bytes = store.read(&key)?;
    Ok(Some((key, String::from_utf8_lossy(&bytes).to_string())))
}
