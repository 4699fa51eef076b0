use std::fmt::{Display, Formatter};

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Transform,
    Enrich,
    Summarize,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Transform => "transform",
            Self::Enrich => "enrich",
            Self::Summarize => "summarize",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("rate source unavailable: {reason}")]
    SourceUnavailable { reason: String, transient: bool },

    #[error("missing credential: {0} is not set in the environment")]
    MissingCredential(String),

    #[error("raw snapshot is missing required field `{field}`")]
    MissingRequiredField { field: String },

    #[error("invalid silver schema: {detail}")]
    InvalidSilverSchema { detail: String },

    /// Every row was filtered out; upstream data-quality problem.
    #[error("no valid rates for base {base_currency}: {detail}")]
    NoValidRates {
        base_currency: String,
        detail: String,
    },

    #[error("partition not found: {location}")]
    FileNotFound { location: String },

    #[error("malformed artifact {location}: {detail}")]
    Malformed { location: String, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("summary generation failed: {0}")]
    Summary(String),

    #[error("i/o error on {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage {stage} failed for {date}: {source}")]
    Stage {
        stage: Stage,
        date: NaiveDate,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn io(location: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            location: location.into(),
            source,
        }
    }

    pub fn malformed(location: impl Into<String>, detail: impl Display) -> Self {
        Self::Malformed {
            location: location.into(),
            detail: detail.to_string(),
        }
    }

    pub fn at_stage(self, stage: Stage, date: NaiveDate) -> Self {
        Self::Stage {
            stage,
            date,
            source: Box::new(self),
        }
    }

    /// Only transient source failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SourceUnavailable { transient, .. } => *transient,
            Self::Stage { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Innermost error, unwrapping stage tags.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
