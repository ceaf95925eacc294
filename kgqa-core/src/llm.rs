//! LLM client for query generation.
//!
//! Every supported provider speaks the OpenAI chat-completions dialect, so a single
//! [`OpenAiCompatibleClient`] covers them all. The provider only decides the base URL.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;

// ============================================================================
// LlmBackend trait
// ============================================================================

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// One completion call. No retry happens here; the caller decides what a
    /// failed call means.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;

    /// Model name for logging.
    fn model(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Trimmed message content, never empty.
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Completion had no content")]
    EmptyResponse,

    #[error("Missing API key for provider {0}")]
    MissingApiKey(LlmProvider),

    #[error("Unknown LLM provider '{0}' (expected openai, deepseek, alibaba, anthropic, groq or local)")]
    UnknownProvider(String),

    #[error("Provider 'local' needs llm.base_url")]
    MissingBaseUrl,
}

// ============================================================================
// Providers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    DeepSeek,
    Alibaba,
    Anthropic,
    Groq,
    Local,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAi => Some("https://api.openai.com/v1"),
            LlmProvider::DeepSeek => Some("https://api.deepseek.com/v1"),
            LlmProvider::Alibaba => Some("https://dashscope-intl.aliyuncs.com/compatible-mode/v1"),
            LlmProvider::Anthropic => Some("https://api.anthropic.com/v1"),
            LlmProvider::Groq => Some("https://api.groq.com/openai/v1"),
            LlmProvider::Local => None,
        }
    }

    /// Hosted providers reject unauthenticated calls; local servers usually don't care.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::Local)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::Alibaba => "alibaba",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Groq => "groq",
            LlmProvider::Local => "local",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "deepseek" => Ok(LlmProvider::DeepSeek),
            "alibaba" => Ok(LlmProvider::Alibaba),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "groq" => Ok(LlmProvider::Groq),
            "local" => Ok(LlmProvider::Local),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

// ============================================================================
// Settings + factory
// ============================================================================

/// Fully resolved client settings. Built once from [`LlmConfig`].
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
}

impl LlmSettings {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: LlmProvider = config.provider.parse()?;

        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .or(provider.default_base_url())
            .ok_or(LlmError::MissingBaseUrl)?
            .trim_end_matches('/')
            .to_string();

        let api_key = config.resolve_api_key();
        if api_key.is_none() && provider.requires_api_key() {
            return Err(LlmError::MissingApiKey(provider));
        }

        Ok(Self {
            provider,
            model: config.model.clone(),
            base_url,
            api_key,
            timeout: config.timeout_secs.map(Duration::from_secs),
        })
    }
}

pub fn create_llm(settings: LlmSettings) -> Result<Box<dyn LlmBackend>, LlmError> {
    Ok(Box::new(OpenAiCompatibleClient::new(settings)?))
}

// ============================================================================
// Chat-completions API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
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

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiCompatibleClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    settings: LlmSettings,
}

impl OpenAiCompatibleClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client, settings })
    }

    /// Same provider settings, different server (for testing / self-hosted proxies).
    pub fn with_base_url(settings: LlmSettings, base_url: String) -> Result<Self, LlmError> {
        Self::new(LlmSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..settings
        })
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.settings.base_url);

        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut call = self.client.post(&url).json(&body);
        if let Some(key) = &self.settings.api_key {
            call = call.bearer_auth(key);
        }
        let response = call.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(
                provider = %self.settings.provider,
                code = status.as_u16(),
                message = %message,
                "LLM API error"
            );
            return Err(LlmError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Completion { content, usage })
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_settings() -> LlmSettings {
        LlmSettings {
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            base_url: "unused".to_string(),
            api_key: Some("sk-test".to_string()),
            timeout: None,
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "You are a SPARQL expert.".to_string(),
            prompt: "Capital of France?".to_string(),
            max_tokens: 64,
            temperature: 0.5,
        }
    }

    #[test]
    fn test_provider_parsing_and_base_urls() {
        assert_eq!("Groq".parse::<LlmProvider>().unwrap(), LlmProvider::Groq);
        assert_eq!(
            LlmProvider::Alibaba.default_base_url(),
            Some("https://dashscope-intl.aliyuncs.com/compatible-mode/v1")
        );
        assert!(LlmProvider::Local.default_base_url().is_none());
        assert!(matches!(
            "mistral".parse::<LlmProvider>(),
            Err(LlmError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_settings_resolution() {
        let cfg = LlmConfig {
            provider: "deepseek".into(),
            api_key: Some("k".into()),
            ..LlmConfig::default()
        };
        let s = LlmSettings::from_config(&cfg).unwrap();
        assert_eq!(s.base_url, "https://api.deepseek.com/v1");
        assert!(s.timeout.is_none());

        let local_without_url = LlmConfig {
            provider: "local".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            LlmSettings::from_config(&local_without_url),
            Err(LlmError::MissingBaseUrl)
        ));

        let local = LlmConfig {
            provider: "local".into(),
            base_url: Some("http://localhost:8000/v1/".into()),
            api_key_env: "KGQA_TEST_UNSET_KEY_VAR".into(),
            ..LlmConfig::default()
        };
        let s = LlmSettings::from_config(&local).unwrap();
        assert_eq!(s.base_url, "http://localhost:8000/v1");
        assert!(s.api_key.is_none());

        let hosted_without_key = LlmConfig {
            provider: "groq".into(),
            api_key_env: "KGQA_TEST_UNSET_KEY_VAR".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            LlmSettings::from_config(&hosted_without_key),
            Err(LlmError::MissingApiKey(LlmProvider::Groq))
        ));
    }

    #[tokio::test]
    async fn test_complete_returns_trimmed_content_and_usage() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiCompatibleClient::with_base_url(test_settings(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 64,
                "messages": [
                    { "role": "system", "content": "You are a SPARQL expert." },
                    { "role": "user", "content": "Capital of France?" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "  SELECT ?x WHERE {}\n" } }],
                "usage": { "prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17 }
            })))
            .mount(&mock_server)
            .await;

        let completion = client.complete(&request()).await.unwrap();
        assert_eq!(completion.content, "SELECT ?x WHERE {}");
        assert_eq!(
            completion.usage,
            TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 5
            }
        );
    }

    #[tokio::test]
    async fn test_empty_content_is_an_error() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiCompatibleClient::with_base_url(test_settings(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "   " } }]
            })))
            .mount(&mock_server)
            .await;

        let result = client.complete(&request()).await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_api_error_carries_provider_message() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiCompatibleClient::with_base_url(test_settings(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit reached", "type": "requests" }
            })))
            .mount(&mock_server)
            .await;

        match client.complete(&request()).await {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_configured_timeout_cuts_off_slow_provider() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "choices": [{ "message": { "content": "SELECT ?x WHERE {}" } }]
                    }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let cfg = LlmConfig {
            api_key: Some("sk-test".into()),
            timeout_secs: Some(1),
            ..LlmConfig::default()
        };
        let settings = LlmSettings::from_config(&cfg).unwrap();
        assert_eq!(settings.timeout, Some(Duration::from_secs(1)));
        let client = OpenAiCompatibleClient::with_base_url(settings, mock_server.uri()).unwrap();

        let start = std::time::Instant::now();
        match client.complete(&request()).await {
            Err(LlmError::Http(e)) => assert!(e.is_timeout(), "{e}"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
