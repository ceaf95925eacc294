use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::KgqaError;
use crate::shapes::ShapeType;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KgqaConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub labels: LabelConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// One of `openai`, `deepseek`, `alibaba`, `anthropic`, `groq`, `local`.
    pub provider: String,
    pub model: String,
    /// Overrides the provider's default base URL. Required for `local`.
    pub base_url: Option<String>,
    /// Literal key. Prefer `api_key_env` so keys stay out of config files.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// No timeout is applied to completion calls unless this is set.
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 512,
            temperature: 0.1,
            timeout_secs: None,
        }
    }
}

impl LlmConfig {
    /// The literal key if configured, otherwise the value of `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TargetConfig {
    pub endpoint_url: Option<String>,
    /// RDF files or directories loaded into one in-memory graph.
    pub local_graph: Vec<String>,
    pub user_agent: String,
    /// Total tries per endpoint request when the gateway answers 502/503/504.
    pub max_attempts: usize,
    pub backoff_ms: u64,
    /// Pause after every endpoint call to stay under public rate limits.
    pub courtesy_delay_ms: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            local_graph: Vec::new(),
            user_agent: "SPARQLQueryBot/1.0".to_string(),
            max_attempts: 4,
            backoff_ms: 1000,
            courtesy_delay_ms: 1000,
        }
    }
}

/// Where queries run, after validating that exactly one target is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Remote { endpoint_url: String },
    Local { paths: Vec<PathBuf> },
}

impl TargetSpec {
    pub fn is_local(&self) -> bool {
        matches!(self, TargetSpec::Local { .. })
    }
}

impl TargetConfig {
    pub fn resolve(&self) -> Result<TargetSpec, KgqaError> {
        let endpoint = self
            .endpoint_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        match (endpoint, self.local_graph.is_empty()) {
            (Some(_), false) => Err(KgqaError::InvalidConfig(
                "both target.endpoint_url and target.local_graph are set; choose one".into(),
            )),
            (None, true) => Err(KgqaError::InvalidConfig(
                "no query target: set target.endpoint_url or target.local_graph".into(),
            )),
            (Some(url), true) => Ok(TargetSpec::Remote {
                endpoint_url: url.to_string(),
            }),
            (None, false) => Ok(TargetSpec::Local {
                paths: self.local_graph.iter().map(|p| expand_path(p)).collect(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; a question gets at most `max_retries + 1` attempts.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Results with more bindings than this are discarded and the attempt fails.
    pub max_result_size: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 1000,
            max_result_size: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PromptConfig {
    pub system_prompt_path: Option<String>,
    pub template_path: Option<String>,
    pub shape_dir: Option<String>,
    pub shape_type: ShapeType,
    /// Knowledge graph family named in the prompt, e.g. `wikidata` or `dbpedia`.
    pub ontology: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt_path: None,
            template_path: None,
            shape_dir: None,
            shape_type: ShapeType::Shex,
            ontology: "wikidata".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LabelConfig {
    pub resolve: bool,
    pub endpoint_url: String,
    pub language: String,
    pub delay_ms: u64,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            resolve: false,
            endpoint_url: "https://query.wikidata.org/sparql".to_string(),
            language: "en".to_string(),
            delay_ms: 500,
        }
    }
}

/// `KGQA__SECTION__KEY` variables. `KGQA__TARGET__LOCAL_GRAPH` takes a
/// comma-separated list of paths.
fn environment() -> Environment {
    Environment::with_prefix("KGQA")
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("target.local_graph")
        .try_parsing(true)
}

impl KgqaConfig {
    /// Load from a TOML file plus `KGQA__SECTION__KEY` environment overrides.
    ///
    /// When `required` is false a missing file yields the defaults.
    pub fn load(path: &str, required: bool) -> Result<Self, ConfigError> {
        Self::load_with(path, required, environment())
    }

    fn load_with(path: &str, required: bool, env: Environment) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(required))
            .add_source(env)
            .build()?;
        s.try_deserialize()
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(path),
    }
}
