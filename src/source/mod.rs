pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;
use crate::error::Result;

pub use http::HttpRateSource;

/// What to ask the provider for. `date: None` means the latest rates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateRequest {
    pub base_currency: String,
    pub date: Option<NaiveDate>,
}

#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Response body exactly as the provider sent it.
    async fn fetch(&self, request: &RateRequest) -> Result<Vec<u8>>;
}
