use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const ENV_BASE_CURRENCY: &str = "FX_BASE_CURRENCY";
pub const ENV_TARGET_CURRENCIES: &str = "FX_TARGET_CURRENCIES";
pub const ENV_API_URL: &str = "FX_API_URL";
pub const ENV_DATA_DIR: &str = "FX_DATA_DIR";
pub const ENV_EXCHANGE_API_KEY: &str = "EXCHANGE_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const ENV_OPENAI_API_BASE: &str = "OPENAI_API_BASE";
pub const ENV_LOG_PROMPTS: &str = "LOG_PROMPTS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default = "default_target_currencies")]
    pub target_currencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub log_prompts: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub base_currency: String,
    pub target_currencies: BTreeSet<String>,
    pub api_url: String,
    #[serde(skip_serializing)]
    pub exchange_api_key: Option<String>,
    pub data_dir: PathBuf,
    pub http: HttpSettings,
    pub summary: SummarySettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummarySettings {
    pub enabled: bool,
    pub top_n: usize,
    pub model: String,
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_attempts: u32,
    pub log_prompts: bool,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from("fx-layers.toml");
        if local.exists() {
            return local;
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/fx-layers/config.toml")
    }

    pub fn read_file(path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        Ok(Some(data))
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed creating config directory: {}", parent.display())
                })?;
            }
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn default_template() -> String {
        let template = r#"# EXCHANGE_API_KEY and OPENAI_API_KEY are read from the environment only.

[pipeline]
base_currency = "BRL"
target_currencies = ["USD", "EUR", "GBP", "JPY", "ARS", "CNY"]

[source]
api_url = "https://v6.exchangerate-api.com/v6"
timeout_secs = 15
connect_timeout_secs = 5
max_attempts = 3
backoff_ms = 500

[storage]
data_dir = "."

[summary]
enabled = true
top_n = 5
model = "gpt-4o"
api_base = "https://api.openai.com"
max_tokens = 400
temperature = 0.2
max_attempts = 3
log_prompts = false
"#;
        template.to_string()
    }
}

/// Merges the fallback file with environment variables (environment wins).
pub fn resolve_config(
    env: &BTreeMap<String, String>,
    file_contents: Option<&str>,
) -> Result<ResolvedConfig, PipelineError> {
    let file: Config = match file_contents {
        Some(raw) => toml::from_str(raw)
            .map_err(|e| PipelineError::InvalidConfig(format!("failed parsing TOML config: {e}")))?,
        None => Config::default(),
    };
    let env_value = |key: &str| {
        env.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let base_currency = normalize_code(
        &env_value(ENV_BASE_CURRENCY).unwrap_or(file.pipeline.base_currency),
    );
    if base_currency.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "base_currency must not be empty".to_string(),
        ));
    }

    let target_list = match env_value(ENV_TARGET_CURRENCIES) {
        Some(raw) => raw.split(',').map(str::to_string).collect::<Vec<_>>(),
        None => file.pipeline.target_currencies,
    };
    let target_currencies = target_list
        .iter()
        .map(|code| normalize_code(code))
        .filter(|code| !code.is_empty())
        .collect::<BTreeSet<_>>();
    if target_currencies.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "target_currencies must list at least one currency".to_string(),
        ));
    }

    let api_url = env_value(ENV_API_URL)
        .unwrap_or(file.source.api_url)
        .trim_end_matches('/')
        .to_string();
    if api_url.is_empty() {
        return Err(PipelineError::InvalidConfig("api_url must not be empty".to_string()));
    }

    let data_dir = expand_tilde(&env_value(ENV_DATA_DIR).unwrap_or(file.storage.data_dir));

    Ok(ResolvedConfig {
        base_currency,
        target_currencies,
        api_url,
        exchange_api_key: env_value(ENV_EXCHANGE_API_KEY),
        data_dir,
        http: HttpSettings {
            timeout_secs: file.source.timeout_secs.max(1),
            connect_timeout_secs: file.source.connect_timeout_secs.max(1),
            max_attempts: file.source.max_attempts.max(1),
            backoff_ms: file.source.backoff_ms,
        },
        summary: SummarySettings {
            enabled: file.summary.enabled,
            top_n: file.summary.top_n.max(1),
            model: env_value(ENV_OPENAI_MODEL).unwrap_or(file.summary.model),
            api_base: env_value(ENV_OPENAI_API_BASE)
                .unwrap_or(file.summary.api_base)
                .trim_end_matches('/')
                .to_string(),
            api_key: env_value(ENV_OPENAI_API_KEY),
            max_tokens: file.summary.max_tokens,
            temperature: file.summary.temperature,
            max_attempts: file.summary.max_attempts.max(1),
            log_prompts: match env_value(ENV_LOG_PROMPTS) {
                Some(raw) => parse_flag(&raw),
                None => file.summary.log_prompts,
            },
        },
    })
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
            target_currencies: default_target_currencies(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: default_top_n(),
            model: default_model(),
            api_base: default_llm_api_base(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_attempts: default_max_attempts(),
            log_prompts: false,
        }
    }
}

fn default_base_currency() -> String {
    "BRL".to_string()
}

fn default_target_currencies() -> Vec<String> {
    ["USD", "EUR", "GBP", "JPY", "ARS", "CNY"]
        .iter()
        .map(|code| code.to_string())
        .collect()
}

fn default_api_url() -> String {
    "https://v6.exchangerate-api.com/v6".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_top_n() -> usize {
    5
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_llm_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_max_tokens() -> u32 {
    400
}

fn default_temperature() -> f32 {
    0.2
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{resolve_config, Config};
    use crate::error::PipelineError;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let resolved = resolve_config(&BTreeMap::new(), None).expect("resolve");
        assert_eq!(resolved.base_currency, "BRL");
        assert!(resolved.target_currencies.contains("USD"));
        assert!(resolved.exchange_api_key.is_none());
        assert_eq!(resolved.http.max_attempts, 3);
    }

    #[test]
    fn environment_takes_priority_over_file() {
        let file = r#"
[pipeline]
base_currency = "usd"
target_currencies = ["EUR"]

[source]
api_url = "https://file.example/v6/"
"#;
        let vars = env(&[
            ("FX_BASE_CURRENCY", "brl"),
            ("FX_TARGET_CURRENCIES", "usd, eur ,jpy"),
        ]);
        let resolved = resolve_config(&vars, Some(file)).expect("resolve");
        assert_eq!(resolved.base_currency, "BRL");
        assert_eq!(
            resolved.target_currencies.iter().cloned().collect::<Vec<_>>(),
            vec!["EUR", "JPY", "USD"]
        );
        assert_eq!(resolved.api_url, "https://file.example/v6");
    }

    #[test]
    fn api_key_is_never_read_from_file() {
        let file = r#"
exchange_api_key = "from-file"

[source]
api_key = "from-file"
"#;
        let resolved = resolve_config(&BTreeMap::new(), Some(file)).expect("resolve");
        assert!(resolved.exchange_api_key.is_none());

        let resolved =
            resolve_config(&env(&[("EXCHANGE_API_KEY", "from-env")]), Some(file)).expect("resolve");
        assert_eq!(resolved.exchange_api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn empty_target_list_is_rejected() {
        let err = resolve_config(&env(&[("FX_TARGET_CURRENCIES", " , ")]), None)
            .expect_err("empty targets");
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn prompt_logging_is_off_unless_requested() {
        let resolved = resolve_config(&BTreeMap::new(), None).expect("resolve");
        assert!(!resolved.summary.log_prompts);

        let file = "[summary]\nlog_prompts = true\n";
        assert!(resolve_config(&BTreeMap::new(), Some(file)).expect("resolve").summary.log_prompts);
        let resolved = resolve_config(&env(&[("LOG_PROMPTS", "false")]), Some(file)).expect("resolve");
        assert!(!resolved.summary.log_prompts);
        let resolved = resolve_config(&env(&[("LOG_PROMPTS", "TRUE")]), None).expect("resolve");
        assert!(resolved.summary.log_prompts);
    }

    #[test]
    fn template_parses_back() {
        let resolved =
            resolve_config(&BTreeMap::new(), Some(&Config::default_template())).expect("resolve");
        assert_eq!(resolved.summary.top_n, 5);
        assert_eq!(resolved.target_currencies.len(), 6);
    }
}
