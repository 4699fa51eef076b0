use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::config::ResolvedConfig;
use crate::error::{PipelineError, Result, Stage};
use crate::ingest::{fetch_and_store_raw, FetchOutcome};
use crate::layers::PartitionKey;
use crate::source::RateSource;
use crate::storage::PartitionStore;
use crate::summary::{summarize_date, SummaryGenerator, SummaryOutcome};
use crate::transform::{enrich_date, transform_date, EnrichOutcome, TransformOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Fetched,
    Transformed,
    Enriched,
    Summarized,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub date: NaiveDate,
    pub state: PipelineState,
    pub fetch: Option<FetchOutcome>,
    pub transform: Option<TransformOutcome>,
    pub enrich: Option<EnrichOutcome>,
    pub summary: Option<SummaryOutcome>,
}

impl PipelineRun {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            state: PipelineState::Pending,
            fetch: None,
            transform: None,
            enrich: None,
            summary: None,
        }
    }
}

/// Sequences raw -> silver -> gold -> summary for one date at a time.
/// Without a summary generator a run ends at `Enriched`.
pub struct PipelineOrchestrator<'a> {
    config: &'a ResolvedConfig,
    store: &'a dyn PartitionStore,
    source: Option<&'a dyn RateSource>,
    summarizer: Option<&'a dyn SummaryGenerator>,
    today: NaiveDate,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(config: &'a ResolvedConfig, store: &'a dyn PartitionStore, today: NaiveDate) -> Self {
        Self {
            config,
            store,
            source: None,
            summarizer: None,
            today,
        }
    }

    pub fn with_source(mut self, source: &'a dyn RateSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Option<&'a dyn SummaryGenerator>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub async fn run(&self, date: NaiveDate, top_n: usize) -> Result<PipelineRun> {
        info!("pipeline starting for {date} (base {})", self.config.base_currency);
        let mut run = PipelineRun::new(date);

        run.fetch = Some(self.fetch(date).await?);
        run.state = PipelineState::Fetched;

        run.transform = Some(self.transform(date)?);
        run.state = PipelineState::Transformed;

        run.enrich = Some(self.enrich(date)?);
        run.state = PipelineState::Enriched;

        if self.summarizer.is_some() {
            run.summary = Some(self.summarize(date, top_n).await?);
            run.state = PipelineState::Summarized;
        } else {
            info!("summary stage disabled, stopping at enriched");
        }

        info!("pipeline finished for {date} in state {:?}", run.state);
        Ok(run)
    }

    pub async fn fetch(&self, date: NaiveDate) -> Result<FetchOutcome> {
        let Some(source) = self.source else {
            return Err(PipelineError::SourceUnavailable {
                reason: "no rate source configured".to_string(),
                transient: false,
            }
            .at_stage(Stage::Fetch, date));
        };
        fetch_and_store_raw(
            self.store,
            source,
            &self.config.base_currency,
            date,
            self.today,
        )
        .await
        .map_err(|e| e.at_stage(Stage::Fetch, date))
    }

    pub fn transform(&self, date: NaiveDate) -> Result<TransformOutcome> {
        self.require(&PartitionKey::raw(date), Stage::Transform, date)?;
        transform_date(
            self.store,
            date,
            &self.config.base_currency,
            &self.config.target_currencies,
        )
        .map_err(|e| e.at_stage(Stage::Transform, date))
    }

    pub fn enrich(&self, date: NaiveDate) -> Result<EnrichOutcome> {
        self.require(&PartitionKey::silver(date), Stage::Enrich, date)?;
        enrich_date(self.store, date).map_err(|e| e.at_stage(Stage::Enrich, date))
    }

    pub async fn summarize(&self, date: NaiveDate, top_n: usize) -> Result<SummaryOutcome> {
        let Some(generator) = self.summarizer else {
            return Err(PipelineError::Summary("no summary generator configured".to_string())
                .at_stage(Stage::Summarize, date));
        };
        self.require(&PartitionKey::gold(date), Stage::Summarize, date)?;
        summarize_date(
            self.store,
            generator,
            date,
            &self.config.base_currency,
            top_n,
            self.config.summary.log_prompts,
        )
        .await
        .map_err(|e| e.at_stage(Stage::Summarize, date))
    }

    fn require(&self, key: &PartitionKey, stage: Stage, date: NaiveDate) -> Result<()> {
        if self.store.exists(key).map_err(|e| e.at_stage(stage, date))? {
            return Ok(());
        }
        Err(PipelineError::FileNotFound {
            location: self.store.location(key),
        }
        .at_stage(stage, date))
    }
}
