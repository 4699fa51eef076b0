use std::time::Duration;

use async_trait::async_trait;
use chrono::Datelike;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{HttpSettings, ResolvedConfig, ENV_EXCHANGE_API_KEY};
use crate::error::{PipelineError, Result};
use crate::source::{RateRequest, RateSource};

const USER_AGENT: &str = concat!("fx-layers/", env!("CARGO_PKG_VERSION"));
const MAX_BACKOFF_MS: u64 = 30_000;

/// exchangerate-api style provider: `{api_url}/{key}/latest/{base}`.
pub struct HttpRateSource {
    client: Client,
    api_url: String,
    api_key: String,
    settings: HttpSettings,
}

impl HttpRateSource {
    pub fn new(config: &ResolvedConfig) -> Result<Self> {
        let api_key = config
            .exchange_api_key
            .clone()
            .ok_or_else(|| PipelineError::MissingCredential(ENV_EXCHANGE_API_KEY.to_string()))?;
        Self::with_key(&config.api_url, api_key, config.http.clone())
    }

    pub fn with_key(api_url: &str, api_key: impl Into<String>, settings: HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|e| PipelineError::SourceUnavailable {
                reason: format!("failed to build HTTP client: {e}"),
                transient: false,
            })?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings,
        })
    }

    pub fn endpoint_url(&self, request: &RateRequest) -> String {
        endpoint_url(&self.api_url, &self.api_key, request)
    }

    async fn fetch_once(&self, url: &str, redacted: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(|e| {
            PipelineError::SourceUnavailable {
                reason: format!("GET {redacted} failed: {e}"),
                transient: e.is_timeout() || e.is_connect() || e.is_request(),
            }
        })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| PipelineError::SourceUnavailable {
            reason: format!("failed reading response body from {redacted}: {e}"),
            transient: true,
        })?;
        if !status.is_success() {
            let preview: String = String::from_utf8_lossy(&body).chars().take(180).collect();
            return Err(PipelineError::SourceUnavailable {
                reason: format!("GET {redacted} returned {status}: {preview}"),
                transient: is_transient_status(status),
            });
        }
        let payload: Value = serde_json::from_slice(&body).map_err(|e| {
            PipelineError::SourceUnavailable {
                reason: format!("invalid JSON response from {redacted}: {e}"),
                transient: false,
            }
        })?;
        if let Some(error_type) = provider_error(&payload) {
            return Err(PipelineError::SourceUnavailable {
                reason: format!("provider reported error: {error_type}"),
                transient: false,
            });
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        "exchangerate-api"
    }

    async fn fetch(&self, request: &RateRequest) -> Result<Vec<u8>> {
        let url = self.endpoint_url(request);
        let redacted = redact(&url, &self.api_key);
        info!("fetching exchange rates from {redacted}");

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once(&url, &redacted).await {
                Ok(payload) => {
                    debug!("rate fetch succeeded on attempt {attempt}");
                    return Ok(payload);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = backoff_delay(self.settings.backoff_ms, attempt);
                    warn!(
                        "rate fetch attempt {attempt}/{max_attempts} failed, retrying in {}ms: {err}",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub fn endpoint_url(api_url: &str, api_key: &str, request: &RateRequest) -> String {
    let base = api_url.trim_end_matches('/');
    match request.date {
        Some(date) => format!(
            "{base}/{api_key}/history/{}/{}/{}/{}",
            request.base_currency,
            date.year(),
            date.month(),
            date.day()
        ),
        None => format!("{base}/{api_key}/latest/{}", request.base_currency),
    }
}

/// 429 and 5xx are worth retrying; other 4xx are not.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

fn provider_error(payload: &Value) -> Option<String> {
    let result = payload.get("result")?.as_str()?;
    if !result.eq_ignore_ascii_case("error") {
        return None;
    }
    Some(
        payload
            .get("error-type")
            .and_then(Value::as_str)
            .unwrap_or("unknown-error")
            .to_string(),
    )
}

fn redact(url: &str, api_key: &str) -> String {
    if api_key.is_empty() {
        return url.to_string();
    }
    url.replace(api_key, "***")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::NaiveDate;
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{backoff_delay, endpoint_url, is_transient_status, provider_error, redact};
    use crate::config::resolve_config;
    use crate::error::PipelineError;
    use crate::source::{HttpRateSource, RateRequest};

    #[test]
    fn builds_latest_and_history_urls() {
        let latest = RateRequest {
            base_currency: "BRL".to_string(),
            date: None,
        };
        assert_eq!(
            endpoint_url("https://v6.exchangerate-api.com/v6/", "k", &latest),
            "https://v6.exchangerate-api.com/v6/k/latest/BRL"
        );
        let history = RateRequest {
            base_currency: "BRL".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, 7),
        };
        assert_eq!(
            endpoint_url("https://v6.exchangerate-api.com/v6", "k", &history),
            "https://v6.exchangerate-api.com/v6/k/history/BRL/2025/9/7"
        );
    }

    #[test]
    fn classifies_statuses() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(500, 40), Duration::from_millis(30_000));
    }

    #[test]
    fn detects_provider_error_payloads() {
        assert_eq!(
            provider_error(&json!({"result": "error", "error-type": "invalid-key"})).as_deref(),
            Some("invalid-key")
        );
        assert!(provider_error(&json!({"result": "success"})).is_none());
        assert!(provider_error(&json!({"base_code": "BRL"})).is_none());
    }

    #[test]
    fn redacts_api_key() {
        assert_eq!(redact("https://x/v6/secret/latest/BRL", "secret"), "https://x/v6/***/latest/BRL");
    }

    #[test]
    fn missing_key_is_a_credential_error() {
        let config = resolve_config(&BTreeMap::new(), None).expect("resolve");
        let err = HttpRateSource::new(&config).err().expect("missing key");
        assert!(matches!(err, PipelineError::MissingCredential(ref name) if name == "EXCHANGE_API_KEY"));
    }
}
