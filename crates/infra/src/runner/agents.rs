//! Per-agent prompts and output shapes.
//!
//! Each arm makes exactly one provider call. There is no retry.

use serde_json::{Value as JsonValue, json};

use productify_ai::{AgentKind, AiClient, AiError, ChatRequest, ImageRequest};

/// Progress message recorded before the provider call.
pub fn progress_step(agent: AgentKind) -> &'static str {
    match agent {
        AgentKind::ContentWriter => "Rewriting content",
        AgentKind::OutlineBuilder => "Drafting outline",
        AgentKind::SeoOptimizer => "Analyzing SEO",
        AgentKind::ImageAgent => "Generating image",
    }
}

pub async fn dispatch(
    ai: &dyn AiClient,
    agent: AgentKind,
    input: &JsonValue,
) -> Result<JsonValue, AiError> {
    match agent {
        AgentKind::ContentWriter => {
            let text = field(input, "text")?;
            let tone = optional(input, "tone").unwrap_or("professional");
            let request = ChatRequest::new(
                format!(
                    "You are a product copywriter. Rewrite the user's content in a {tone} tone. \
                     Keep the meaning, return only the rewritten text."
                ),
                text,
            )
            .with_temperature(0.7);
            let content = ai.complete(request).await?;
            Ok(json!({ "content": content }))
        }
        AgentKind::OutlineBuilder => {
            let topic = field(input, "topic")?;
            let sections = input
                .get("sections")
                .and_then(JsonValue::as_u64)
                .unwrap_or(5)
                .clamp(1, 20);
            let request = ChatRequest::new(
                format!(
                    "You outline digital products. Return {sections} section titles, one per line, \
                     without numbering."
                ),
                topic,
            )
            .with_max_tokens(400);
            let raw = ai.complete(request).await?;
            Ok(json!({ "outline": outline_lines(&raw) }))
        }
        AgentKind::SeoOptimizer => {
            let text = field(input, "text")?;
            let request = ChatRequest::new(
                "You are an SEO editor. Suggest a title, a meta description and five keywords \
                 for the user's text.",
                text,
            )
            .with_temperature(0.3);
            let suggestions = ai.complete(request).await?;
            Ok(json!({ "suggestions": suggestions }))
        }
        AgentKind::ImageAgent => {
            let prompt = field(input, "prompt")?;
            let mut request = ImageRequest::new(prompt);
            if let Some(size) = optional(input, "size") {
                request = request.with_size(size);
            }
            let url = ai.generate_image(request).await?;
            Ok(json!({ "image_url": url }))
        }
    }
}

fn field<'a>(input: &'a JsonValue, name: &str) -> Result<&'a str, AiError> {
    optional(input, name).ok_or_else(|| AiError::InvalidInput(format!("missing field '{name}'")))
}

fn optional<'a>(input: &'a JsonValue, name: &str) -> Option<&'a str> {
    input
        .get(name)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Split a completion into outline entries, dropping list markers.
fn outline_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| {
                    c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ')')
                })
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}
