//! OpenAI chat + image client.
//!
//! Status mapping:
//!
//! | HTTP status | `AiError` |
//! |---|---|
//! | 429 | `QuotaExceeded` |
//! | 401 | `InvalidApiKey` |
//! | other non-2xx | `Api { status, message }` |
//! | connect/TLS/timeout | `Transport` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{AiClient, ChatMessage, ChatRequest, ImageRequest};
use crate::error::AiError;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<String, AiError> {
        let res = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = res.status().as_u16();
        let text = res
            .text()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            let err = map_error_status(status, &text);
            warn!(path, status, error = %err, "openai request failed");
            return Err(err);
        }

        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
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

/// Map a non-2xx provider response to an [`AiError`].
pub(crate) fn map_error_status(status: u16, body: &str) -> AiError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        429 => AiError::QuotaExceeded(message),
        401 => AiError::InvalidApiKey(message),
        _ => AiError::Api { status, message },
    }
}

pub(crate) fn parse_chat_completion(body: &str) -> Result<String, AiError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| AiError::InvalidResponse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AiError::InvalidResponse("completion had no content".to_string()))
}

pub(crate) fn parse_image_generation(body: &str) -> Result<String, AiError> {
    let parsed: ImageGenerationResponse =
        serde_json::from_str(body).map_err(|e| AiError::InvalidResponse(e.to_string()))?;

    parsed
        .data
        .into_iter()
        .find_map(|d| d.url)
        .ok_or_else(|| AiError::InvalidResponse("image response had no url".to_string()))
}

#[async_trait]
impl AiClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, AiError> {
        let body = ChatCompletionBody {
            model: &self.config.chat_model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        debug!(model = %self.config.chat_model, messages = request.messages.len(), "chat completion");
        let text = self.post_json("chat/completions", &body).await?;
        parse_chat_completion(&text)
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<String, AiError> {
        let body = ImageGenerationBody {
            model: &self.config.image_model,
            prompt: &request.prompt,
            n: 1,
            size: &request.size,
        };
        debug!(model = %self.config.image_model, size = %request.size, "image generation");
        let text = self.post_json("images/generations", &body).await?;
        parse_image_generation(&text)
    }
}
