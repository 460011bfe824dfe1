//! Text-generation provider abstraction and implementations.
//!
//! Defines the [`TextGenerator`] trait, the only way the pipeline talks to a
//! language model, and concrete providers:
//! - **[`DisabledGenerator`]**: returns errors; used when generation is not configured.
//! - **[`OpenAIGenerator`]**: calls an OpenAI-compatible `chat/completions` endpoint.
//! - **[`OllamaGenerator`]**: calls a local Ollama instance's `/api/chat` endpoint.
//!
//! Providers make exactly one attempt per call and classify failures into
//! [`GenerationError`] kinds. Retry, backoff, timeouts, and the global
//! concurrency cap live in [`crate::dispatch::Dispatcher`], which wraps a
//! provider and is itself a [`TextGenerator`].
//!
//! # Error classification
//!
//! - HTTP 429 → [`GenerationError::RateLimited`] (honours `Retry-After`)
//! - HTTP 5xx, network errors → [`GenerationError::Transient`]
//! - HTTP 4xx (not 429), missing credentials → [`GenerationError::Fatal`]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::GenerationError;

/// A system role plus the user request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Output limits for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraints {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Constraints {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        }
    }
}

/// A text-generation backend: `generate(prompt, constraints) → text`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &Prompt,
        constraints: &Constraints,
    ) -> Result<String, GenerationError>;
}

// ============ Disabled Provider ============

/// A provider that refuses every call.
///
/// Used when `generation.provider = "disabled"`. Every document processed
/// with it ends up `unprocessable`, which makes it useful for dry runs of
/// the store and join stages.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &Prompt,
        _constraints: &Constraints,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Fatal(
            "Generation provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Provider for OpenAI-compatible chat completion APIs.
///
/// The API key is read once, at construction, from the environment variable
/// named by `generation.api_key_env`.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAIGenerator {
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config or the API key
    /// variable is not in the environment.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        constraints: &Constraints,
    ) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": constraints.temperature,
            "max_tokens": constraints.max_output_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status("OpenAI", status, &body_text, retry_after));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Transient(format!("invalid OpenAI response: {}", e)))?;
        parse_openai_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat completion.
fn parse_openai_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            GenerationError::Transient(
                "Invalid OpenAI response: missing choices[0].message.content".to_string(),
            )
        })
}

// ============ Ollama Provider ============

/// Provider for a local Ollama instance.
///
/// Calls `POST /api/chat` on the configured URL (default:
/// `http://localhost:11434`) with streaming disabled.
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        constraints: &Constraints,
    ) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "options": {
                "temperature": constraints.temperature,
                "num_predict": constraints.max_output_tokens,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                GenerationError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status("Ollama", status, &body_text, retry_after));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Transient(format!("invalid Ollama response: {}", e)))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            GenerationError::Transient("Invalid Ollama response: missing message.content".to_string())
        })
}

// ============ Shared helpers ============

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_status(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> GenerationError {
    let message = format!("{} API error {}: {}", provider, status, body);
    if status.as_u16() == 429 {
        GenerationError::RateLimited {
            message,
            retry_after,
        }
    } else if status.is_server_error() {
        GenerationError::Transient(message)
    } else {
        GenerationError::Fatal(message)
    }
}

fn classify_transport_error(e: reqwest::Error) -> GenerationError {
    GenerationError::Transient(e.to_string())
}

/// Instantiate the provider named by `generation.provider`.
///
/// The returned provider makes single attempts; wrap it in a
/// [`crate::dispatch::Dispatcher`] before use in the pipeline.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
