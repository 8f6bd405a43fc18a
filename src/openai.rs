use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::config::{mask_key, Config};

#[derive(Debug, Error)]
pub enum OpenAiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("OpenAI API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("empty response: {0}")]
    Empty(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("download failed: {0}")]
    Transport(String),
    #[error("download returned HTTP {0}")]
    Status(u16),
    #[error("download timed out")]
    Timeout,
}

// --- Request payloads ---

#[derive(Debug, Serialize, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

#[derive(Debug, Serialize, Clone)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub struct ImageUrl {
    pub url: String,
    pub detail: Option<&'static str>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: "system", content: MessageContent::Text(text.into()) }
    }

    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self { role: "user", content: MessageContent::Parts(parts) }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub n: u8,
}

// --- Response payloads ---

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// Inline photos are large; keep request logs readable.
fn truncate_data_urls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "url" {
                    if let serde_json::Value::String(s) = val {
                        if s.starts_with("data:") && s.len() > 80 {
                            *s = format!("{}...[truncated {} chars]", &s[..40], s.len() - 40);
                        }
                    }
                } else {
                    truncate_data_urls(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_data_urls(val);
            }
        }
        _ => {}
    }
}

fn summarize<T: Serialize>(payload: &T) -> String {
    match serde_json::to_value(payload) {
        Ok(mut value) => {
            truncate_data_urls(&mut value);
            value.to_string()
        }
        Err(_) => String::new(),
    }
}

fn api_error(status: StatusCode, body: &str) -> OpenAiError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    OpenAiError::Api { status: status.as_u16(), message }
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiClient {
    /// Every call is bounded by `request_timeout`; downloads set their own, shorter one.
    pub fn new(config: &Config) -> Result<Self, OpenAiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OpenAiError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base.clone(),
        })
    }

    /// Same connection pool, different credentials.
    pub fn with_api_key(&self, api_key: impl Into<String>) -> Self {
        Self { api_key: Some(api_key.into()), ..self.clone() }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn bearer(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    fn key_label(&self) -> String {
        self.api_key.as_deref().map(mask_key).unwrap_or_else(|| "none".to_string())
    }

    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<String, OpenAiError> {
        let url = format!("{}/chat/completions", self.base_url);
        info!("🔗 Chat completion via {} (model={}, key={})", url, request.model, self.key_label());
        tracing::debug!("📤 Request body: {}", summarize(request));

        let response = self.client
            .post(&url)
            .bearer_auth(self.bearer())
            .json(request)
            .send()
            .await
            .map_err(|e| OpenAiError::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| OpenAiError::Http(e.to_string()))?;
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            error!("❌ Chat completion failed with status {}: {}", status, body);
            return Err(api_error(status, &body));
        }

        let parsed: ChatCompletion = serde_json::from_str(&body)
            .map_err(|e| OpenAiError::Decode(e.to_string()))?;

        parsed.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(OpenAiError::Empty("no message content in chat completion"))
    }

    pub async fn generate_image(&self, request: &ImageRequest) -> Result<String, OpenAiError> {
        let url = format!("{}/images/generations", self.base_url);
        info!("🔗 Image generation via {} (model={}, size={})", url, request.model, request.size);

        let response = self.client
            .post(&url)
            .bearer_auth(self.bearer())
            .json(request)
            .send()
            .await
            .map_err(|e| OpenAiError::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| OpenAiError::Http(e.to_string()))?;

        if !status.is_success() {
            error!("❌ Image generation failed with status {}: {}", status, body);
            return Err(api_error(status, &body));
        }

        let parsed: ImagesResponse = serde_json::from_str(&body)
            .map_err(|e| OpenAiError::Decode(e.to_string()))?;

        parsed.data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .ok_or(OpenAiError::Empty("no image url in response"))
    }

    /// Plain GET without credentials; generated image URLs are pre-signed.
    pub async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Bytes, DownloadError> {
        let response = self.client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }
        response.bytes().await.map_err(classify_transport)
    }
}

fn classify_transport(e: reqwest::Error) -> DownloadError {
    if e.is_timeout() {
        DownloadError::Timeout
    } else {
        DownloadError::Transport(e.to_string())
    }
}
