use async_trait::async_trait;

use crate::client::{AiClient, ChatRequest, ImageRequest};
use crate::error::AiError;

/// Placeholder provider used when `OPENAI_API_KEY` is not configured.
///
/// Output is deterministic so dashboards and tests behave the same on every run.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockAiClient;

impl MockAiClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AiClient for MockAiClient {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, AiError> {
        let prompt = request.last_user_message().unwrap_or_default();
        let preview: String = prompt.chars().take(80).collect();
        Ok(format!("[mock completion] {preview}"))
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<String, AiError> {
        let size = url_safe(&request.size, 16);
        let text = url_safe(&request.prompt, 32);
        Ok(format!("https://placehold.co/{size}?text={text}"))
    }
}

/// Keep ASCII alphanumerics, replace everything else with `+`.
fn url_safe(s: &str, max: usize) -> String {
    s.chars()
        .take(max)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '+' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_prompt_preview() {
        let out = MockAiClient::new()
            .complete(ChatRequest::new("system", "rewrite this"))
            .await
            .unwrap();
        assert_eq!(out, "[mock completion] rewrite this");
    }

    #[tokio::test]
    async fn image_url_is_url_safe() {
        let url = MockAiClient::new()
            .generate_image(ImageRequest::new("a red fox & moon"))
            .await
            .unwrap();
        assert_eq!(url, "https://placehold.co/1024x1024?text=a+red+fox+++moon");
    }

    #[tokio::test]
    async fn odd_size_cannot_break_the_url() {
        let url = MockAiClient::new()
            .generate_image(ImageRequest::new("fox").with_size("1x1/../?a=b"))
            .await
            .unwrap();
        assert_eq!(url, "https://placehold.co/1x1+++++a+b?text=fox");
    }
}
