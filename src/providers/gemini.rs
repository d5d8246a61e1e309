//! Gemini REST provider
//!
//! Talks to the Generative Language API directly:
//!
//! - `GET  {base}/models/{model}` checks the model when a session opens
//! - `POST {base}/models/{model}:streamGenerateContent?alt=sse` streams a turn
//! - `POST {base}/models/{model}:generateContent` for single-shot requests
//!
//! # Configuration
//!
//! ```toml
//! [llm]
//! model = "gemini-2.5-flash"
//! api_key_env = "GEMINI_API_KEY"
//! endpoint = "https://generativelanguage.googleapis.com/v1beta"
//! ```

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;

use super::{Chunk, ChunkStream, GenerateContentRequest, GenerateContentResponse, Gateway, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Gemini provider configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Base URL for the API, without a trailing slash
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
        }
    }
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn model_url(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}:{}", self.model_url(), method)
    }
}

/// Google error envelope
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl ApiError {
    fn describe(self) -> String {
        let message = self.message.unwrap_or_default();
        match self.status {
            Some(status) if !status.is_empty() => format!("{}: {}", status, message),
            _ => message,
        }
    }
}

pub struct GeminiProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("GEMINI_API_KEY is not set".to_string()))
    }

    async fn post(&self, url: String, request: &GenerateContentRequest) -> Result<Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key()?)
            .json(request)
            .send()
            .await?;

        check_status(response).await
    }
}

#[async_trait]
impl Gateway for GeminiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn open_session(&self, system_instruction: &str) -> Result<String, ProviderError> {
        if system_instruction.trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "system instruction is empty".to_string(),
            ));
        }

        let response = self
            .client
            .get(self.config.model_url())
            .header("x-goog-api-key", self.api_key()?)
            .send()
            .await?;
        check_status(response).await?;

        let handle = uuid::Uuid::new_v4().to_string();
        debug!(model = %self.config.model, %handle, "Opened Gemini session");
        Ok(handle)
    }

    async fn stream_content(&self, request: GenerateContentRequest) -> Result<ChunkStream, ProviderError> {
        let url = format!("{}?alt=sse", self.config.method_url("streamGenerateContent"));
        debug!(model = %self.config.model, contents = request.contents.len(), "Gemini streaming request");

        let response = self.post(url, &request).await?;
        Ok(Box::pin(sse_chunks(response.bytes_stream())))
    }

    async fn generate_content(&self, request: GenerateContentRequest) -> Result<Option<String>, ProviderError> {
        let url = self.config.method_url("generateContent");
        debug!(model = %self.config.model, "Gemini request");

        let response = self.post(url, &request).await?;
        let body = response.text().await?;

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        Ok(parsed.text())
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error.describe())
        .unwrap_or(body);

    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Split an SSE byte stream into lines and decode each `data:` line.
///
/// Lines are reassembled from raw bytes so multi-byte characters split across
/// network reads survive.
fn sse_chunks<S, B>(bytes: S) -> impl Stream<Item = Result<Chunk, ProviderError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(piece) = bytes.next().await {
            buffer.extend_from_slice(piece?.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(chunk) = parse_sse_line(&line)? {
                    yield chunk;
                }
            }
        }

        if let Some(chunk) = parse_sse_line(&buffer)? {
            yield chunk;
        }
    }
}

/// Parse one line of the SSE body.
///
/// Only `data:` lines carry chunks; blank lines, comments and other fields
/// yield `None`.
fn parse_sse_line(line: &[u8]) -> Result<Option<Chunk>, ProviderError> {
    let line = std::str::from_utf8(line)
        .map_err(|e| ProviderError::InvalidResponse(format!("Stream is not UTF-8: {}", e)))?;

    let Some(data) = line.trim_end_matches(&['\r', '\n'][..]).strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    if let Ok(error) = serde_json::from_str::<ErrorResponse>(data) {
        return Err(ProviderError::InvalidResponse(format!(
            "Stream error: {}",
            error.error.describe()
        )));
    }

    let event: GenerateContentResponse = serde_json::from_str(data).map_err(|e| {
        ProviderError::InvalidResponse(format!("Failed to parse stream chunk: {}", e))
    })?;

    Ok(Some(Chunk { text: event.text() }))
}
