use async_trait::async_trait;
use reqwest::{header::{HeaderMap, HeaderValue}, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CompletionConfig;
use crate::errors::{CompletionError, CompletionResult};

/// Stop sequence asking the engine not to invent tool observations
pub const OBSERVATION_STOP: &str = "\nObservation:";

/// Text-completion capability consumed by the reasoning loop
#[async_trait]
pub trait CompletionEngine: Send + Sync {
    /// Generate text from a prompt
    async fn complete(&self, prompt: &str) -> CompletionResult<String>;

    /// Cheap liveness check used at startup
    async fn probe(&self) -> CompletionResult<()>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;

    /// Get the model name being used
    fn model_name(&self) -> String;
}

fn build_http_client(timeout: Duration, headers: Option<HeaderMap>) -> CompletionResult<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10));
    if let Some(headers) = headers {
        builder = builder.default_headers(headers);
    }
    builder
        .build()
        .map_err(|e| CompletionError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

async fn check_status(response: reqwest::Response) -> CompletionResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CompletionError::HttpError {
        status_code: status.as_u16(),
        message: format!("API request failed: {}", body),
    })
}

//------------------------------------------------------------------------------
// Ollama Client
//------------------------------------------------------------------------------

/// Ollama API client for self-hosted models
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    model_name: String,
    temperature: f32,
    http_client: Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    stop: Vec<&'static str>,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: &CompletionConfig) -> CompletionResult<Self> {
        if config.base_url.is_empty() {
            return Err(CompletionError::ConfigError(
                "Ollama base URL cannot be empty".to_string(),
            ));
        }

        // Local models may be slow, the request timeout comes from config
        let http_client = build_http_client(config.request_timeout(), None)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_name: config.model.clone(),
            temperature: config.temperature,
            http_client,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

#[async_trait]
impl CompletionEngine for OllamaClient {
    async fn complete(&self, prompt: &str) -> CompletionResult<String> {
        debug!(model = %self.model_name, prompt_len = prompt.len(), "Generating text with Ollama");

        let request = OllamaRequest {
            model: &self.model_name,
            prompt,
            stream: false, // We want a single response
            options: OllamaOptions {
                temperature: self.temperature,
                stop: vec![OBSERVATION_STOP],
            },
        };

        let response = self
            .http_client
            .post(self.generate_url())
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::ParsingError(format!("Failed to parse Ollama response: {}", e)))?;

        if let (Some(total), Some(eval_count)) =
            (ollama_response.total_duration, ollama_response.eval_count)
        {
            debug!(total_duration_ns = total, eval_tokens = eval_count, "Ollama performance");
        }

        if ollama_response.response.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }

        Ok(ollama_response.response)
    }

    async fn probe(&self) -> CompletionResult<()> {
        let response = self.http_client.get(self.tags_url()).send().await?;
        check_status(response).await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}

//------------------------------------------------------------------------------
// OpenAI-compatible Client
//------------------------------------------------------------------------------

/// Client for OpenAI-compatible chat completion endpoints (OpenAI, vLLM, llama.cpp server)
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: String,
    model_name: String,
    temperature: f32,
    http_client: Client,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    stop: Vec<&'static str>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize, Debug)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize, Debug)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &CompletionConfig) -> CompletionResult<Self> {
        if config.base_url.is_empty() {
            return Err(CompletionError::ConfigError(
                "OpenAI base URL cannot be empty".to_string(),
            ));
        }

        let headers = match config.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(api_key) => {
                let mut headers = HeaderMap::new();
                let value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .map_err(|_| CompletionError::ConfigError("Invalid API key format".to_string()))?;
                headers.insert("Authorization", value);
                Some(headers)
            }
            None => None,
        };

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_name: config.model.clone(),
            temperature: config.temperature,
            http_client: build_http_client(config.request_timeout(), headers)?,
        })
    }
}

#[async_trait]
impl CompletionEngine for OpenAiClient {
    async fn complete(&self, prompt: &str) -> CompletionResult<String> {
        debug!(model = %self.model_name, prompt_len = prompt.len(), "Generating text with OpenAI-compatible endpoint");

        let request = OpenAiRequest {
            model: &self.model_name,
            messages: vec![OpenAiMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            stop: vec![OBSERVATION_STOP],
        };

        let response = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::ParsingError(format!("Failed to parse OpenAI response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }

    async fn probe(&self) -> CompletionResult<()> {
        let response = self
            .http_client
            .get(format!("{}/v1/models", self.base_url))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}

//------------------------------------------------------------------------------
// Startup probe
//------------------------------------------------------------------------------

/// Probes the engine up to `attempts` times, `interval` apart.
/// Returns the last error once every attempt has failed.
pub async fn wait_until_ready(
    engine: &dyn CompletionEngine,
    attempts: u32,
    interval: Duration,
) -> CompletionResult<()> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match engine.probe().await {
            Ok(()) => {
                info!(
                    provider = engine.provider_name(),
                    model = %engine.model_name(),
                    attempt,
                    "Completion engine is reachable"
                );
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                warn!(
                    provider = engine.provider_name(),
                    attempt,
                    attempts,
                    error = %e,
                    "Completion engine not ready, retrying in {}s",
                    interval.as_secs()
                );
                tokio::time::sleep(interval).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

//------------------------------------------------------------------------------
// Factory Function
//------------------------------------------------------------------------------

/// Creates a completion engine based on the provided configuration.
pub fn create_completion_engine(
    config: &CompletionConfig,
) -> CompletionResult<Arc<dyn CompletionEngine>> {
    match config.provider.as_str() {
        "ollama" => {
            info!(model = %config.model, base_url = %config.base_url, "Creating Ollama completion client");
            Ok(Arc::new(OllamaClient::new(config)?))
        }
        "openai" => {
            info!(model = %config.model, base_url = %config.base_url, "Creating OpenAI-compatible completion client");
            Ok(Arc::new(OpenAiClient::new(config)?))
        }
        other => Err(CompletionError::ConfigError(format!(
            "Unsupported completion provider '{}'",
            other
        ))),
    }
}
