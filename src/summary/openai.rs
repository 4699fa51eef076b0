use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::{SummarySettings, ENV_OPENAI_API_KEY};
use crate::error::{PipelineError, Result};
use crate::summary::prompt::SYSTEM_PROMPT;
use crate::summary::{GeneratedSummary, SummaryGenerator, SummaryRequest};

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// OpenAI-compatible `/v1/chat/completions` client.
pub struct OpenAiSummaryGenerator {
    client: Client,
    api_key: String,
    settings: SummarySettings,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiSummaryGenerator {
    pub fn new(settings: &SummarySettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| PipelineError::MissingCredential(ENV_OPENAI_API_KEY.to_string()))?;
        let client = Client::builder()
            .user_agent(concat!("fx-layers/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PipelineError::Summary(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            settings: settings.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.settings.api_base.trim_end_matches('/'))
    }

    async fn call_once(&self, prompt: &str) -> Result<GeneratedSummary> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Summary(format!("chat request failed: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::Summary(format!("chat request rejected: {e}")))?;
        let raw: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Summary(format!("invalid chat response: {e}")))?;
        parse_response(raw)
    }
}

#[async_trait]
impl SummaryGenerator for OpenAiSummaryGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &SummaryRequest) -> Result<GeneratedSummary> {
        let attempts = self.settings.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.call_once(&request.prompt).await {
                Ok(summary) => return Ok(summary),
                Err(err) => {
                    warn!("summary attempt {attempt}/{attempts} failed: {err}");
                    last_error = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| PipelineError::Summary("no attempts made".to_string())))
    }
}

fn parse_response(raw: Value) -> Result<GeneratedSummary> {
    let parsed: ChatResponse = serde_json::from_value(raw.clone())
        .map_err(|e| PipelineError::Summary(format!("invalid chat response: {e}")))?;
    let model = parsed.model.clone();
    let text = extract_text(parsed)?;
    Ok(GeneratedSummary {
        text,
        model,
        raw_response: Some(raw),
    })
}

fn extract_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| PipelineError::Summary("chat response had no content".to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{extract_text, parse_response, ChatResponse, OpenAiSummaryGenerator};
    use crate::config::resolve_config;
    use crate::error::PipelineError;

    #[test]
    fn extracts_first_choice_content() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  Simulated summary \n"}}]}"#,
        )
        .expect("parse");
        assert_eq!(extract_text(parsed).expect("text"), "Simulated summary");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert!(matches!(extract_text(empty), Err(PipelineError::Summary(_))));
    }

    #[test]
    fn keeps_model_and_raw_response() {
        let raw = json!({
            "id": "chatcmpl-9",
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"role": "assistant", "content": "Real trend"}}],
            "usage": {"total_tokens": 120}
        });
        let summary = parse_response(raw.clone()).expect("summary");
        assert_eq!(summary.text, "Real trend");
        assert_eq!(summary.model.as_deref(), Some("gpt-4o-2024-08-06"));
        assert_eq!(summary.raw_response, Some(raw));
    }

    #[test]
    fn requires_api_key_from_environment() {
        let config = resolve_config(&BTreeMap::new(), None).expect("resolve");
        let err = OpenAiSummaryGenerator::new(&config.summary).err().expect("missing key");
        assert!(matches!(err, PipelineError::MissingCredential(ref name) if name == "OPENAI_API_KEY"));

        let mut env = BTreeMap::new();
        env.insert("OPENAI_API_KEY".to_string(), "sk-test".to_string());
        env.insert("OPENAI_API_BASE".to_string(), "http://localhost:9999/".to_string());
        let config = resolve_config(&env, None).expect("resolve");
        let generator = OpenAiSummaryGenerator::new(&config.summary).expect("generator");
        assert_eq!(generator.endpoint(), "http://localhost:9999/v1/chat/completions");
    }
}
