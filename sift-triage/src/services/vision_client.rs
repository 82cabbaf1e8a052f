//! Remote vision-language model boundary
//!
//! [`VisionModel`] is the single `analyze(image, prompt, model) -> text`
//! operation the triage selector and scorer depend on. [`HttpVisionClient`]
//! implements it against an OpenAI-compatible chat completions endpoint,
//! sending the image inline as a base64 data URL.

use async_trait::async_trait;
use base64::Engine;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default OpenAI-compatible endpoint
pub const DEFAULT_VISION_ENDPOINT: &str = "https://api.openai.com/v1";

const USER_AGENT: &str = concat!("PhotoSift/", env!("CARGO_PKG_VERSION"));
const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;
const MAX_RESPONSE_TOKENS: u32 = 1024;

/// Remote model errors (per call)
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected model response: {0}")]
    Parse(String),
}

/// Model identity: name plus pinned version
///
/// Written as `name@version` (e.g. `gpt-4o@2024-08-06`). The version is part
/// of the inference cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelSpec {
    pub name: String,
    pub version: String,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse a comma-separated list, skipping blanks
    pub fn parse_list(list: &str) -> Result<Vec<ModelSpec>, String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }

    /// Identifier sent to the endpoint (`gpt-4o-2024-08-06`)
    pub fn api_model_id(&self) -> String {
        if self.version.is_empty() || self.version == "latest" {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}

impl FromStr for ModelSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, version) = s.split_once('@').unwrap_or((s, "latest"));
        let (name, version) = (name.trim(), version.trim());
        if name.is_empty() || version.is_empty() {
            return Err(format!("Invalid model spec (expected name@version): {}", s));
        }
        Ok(ModelSpec::new(name, version))
    }
}

impl TryFrom<String> for ModelSpec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelSpec> for String {
    fn from(spec: ModelSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Remote vision model
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Ask `model` about `image` (encoded bytes) and return its text answer
    async fn analyze(
        &self,
        image: &[u8],
        prompt: &str,
        model: &ModelSpec,
    ) -> Result<String, ModelError>;

    /// Wait for a free call slot
    ///
    /// Callers await this before starting the timed `analyze` so time spent
    /// queued behind a rate limit never counts against the call timeout.
    async fn ready(&self) {}
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible HTTP client
pub struct HttpVisionClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    rate_limiter: DefaultDirectRateLimiter,
}

impl HttpVisionClient {
    /// Create client
    ///
    /// # Arguments
    /// * `endpoint` - Base URL, `/chat/completions` is appended
    /// * `api_key` - Bearer token
    /// * `request_timeout` - Per-request HTTP timeout
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let per_second = NonZeroU32::new(DEFAULT_REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn data_url(image: &[u8]) -> String {
        let mime = infer::get(image)
            .map(|kind| kind.mime_type())
            .unwrap_or("image/jpeg");
        format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(image)
        )
    }
}

#[async_trait]
impl VisionModel for HttpVisionClient {
    async fn ready(&self) {
        self.rate_limiter.until_ready().await;
    }

    async fn analyze(
        &self,
        image: &[u8],
        prompt: &str,
        model: &ModelSpec,
    ) -> Result<String, ModelError> {
        let body = json!({
            "model": model.api_model_id(),
            "max_tokens": MAX_RESPONSE_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": Self::data_url(image) } }
                ]
            }]
        });

        tracing::debug!(model = %model, image_bytes = image.len(), "Querying vision model");

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::Parse("response has no message content".to_string()))
    }
}
