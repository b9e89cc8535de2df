use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use productify_auth::{Feature, PlanTier};

use crate::client::IMAGE_SIZES;
use crate::error::AiError;

/// A named AI operation runnable through the job runner.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Rewrites a block of content.
    ContentWriter,
    /// Drafts a section outline for a product.
    OutlineBuilder,
    /// Suggests title/keyword improvements for a text.
    SeoOptimizer,
    /// Generates one image from a prompt.
    ImageAgent,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown agent '{0}'")]
pub struct UnknownAgent(pub String);

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::ContentWriter,
        AgentKind::OutlineBuilder,
        AgentKind::SeoOptimizer,
        AgentKind::ImageAgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::ContentWriter => "content_writer",
            AgentKind::OutlineBuilder => "outline_builder",
            AgentKind::SeoOptimizer => "seo_optimizer",
            AgentKind::ImageAgent => "image_agent",
        }
    }

    /// Fixed credit cost; there is no per-request cost model.
    pub fn estimated_credits(&self) -> i64 {
        match self {
            AgentKind::ContentWriter => 5,
            AgentKind::OutlineBuilder => 3,
            AgentKind::SeoOptimizer => 2,
            AgentKind::ImageAgent => 10,
        }
    }

    pub fn required_feature(&self) -> Feature {
        match self {
            AgentKind::ImageAgent => Feature::ImageGeneration,
            _ => Feature::AiWriter,
        }
    }

    pub fn required_plan(&self) -> PlanTier {
        self.required_feature().min_plan()
    }

    /// Name of the input field that must be a non-empty string.
    fn required_field(&self) -> &'static str {
        match self {
            AgentKind::ContentWriter | AgentKind::SeoOptimizer => "text",
            AgentKind::OutlineBuilder => "topic",
            AgentKind::ImageAgent => "prompt",
        }
    }

    /// Reject input the agent cannot run on, before anything is persisted.
    pub fn validate_input(&self, input: &JsonValue) -> Result<(), AiError> {
        let field = self.required_field();
        match input.get(field).and_then(JsonValue::as_str) {
            Some(s) if !s.trim().is_empty() => {}
            Some(_) => {
                return Err(AiError::InvalidInput(format!(
                    "'{field}' must not be empty for {}",
                    self.as_str()
                )));
            }
            None => {
                return Err(AiError::InvalidInput(format!(
                    "{} requires a string field '{field}'",
                    self.as_str()
                )));
            }
        }

        if *self == AgentKind::ImageAgent {
            if let Some(size) = input.get("size") {
                if !size.as_str().is_some_and(|s| IMAGE_SIZES.contains(&s)) {
                    return Err(AiError::InvalidInput(format!(
                        "size must be one of {}",
                        IMAGE_SIZES.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }
}

impl core::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim())
            .ok_or_else(|| UnknownAgent(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cost_table() {
        assert_eq!(AgentKind::ContentWriter.estimated_credits(), 5);
        assert_eq!(AgentKind::OutlineBuilder.estimated_credits(), 3);
        assert_eq!(AgentKind::SeoOptimizer.estimated_credits(), 2);
        assert_eq!(AgentKind::ImageAgent.estimated_credits(), 10);
    }

    #[test]
    fn parses_every_catalog_name() {
        for agent in AgentKind::ALL {
            assert_eq!(agent.as_str().parse::<AgentKind>().unwrap(), agent);
        }
        assert_eq!(
            "video_agent".parse::<AgentKind>(),
            Err(UnknownAgent("video_agent".to_string()))
        );
    }

    #[test]
    fn image_agent_needs_plus() {
        assert_eq!(AgentKind::ImageAgent.required_plan(), PlanTier::Plus);
        assert_eq!(AgentKind::ContentWriter.required_plan(), PlanTier::Free);
    }

    #[test]
    fn validates_required_field() {
        assert!(AgentKind::ContentWriter.validate_input(&json!({"text": "hello"})).is_ok());
        assert!(matches!(
            AgentKind::ContentWriter.validate_input(&json!({"text": "   "})),
            Err(AiError::InvalidInput(_))
        ));
        assert!(matches!(
            AgentKind::ImageAgent.validate_input(&json!({"text": "a cat"})),
            Err(AiError::InvalidInput(_))
        ));
        assert!(AgentKind::OutlineBuilder.validate_input(&json!({"topic": "Rust"})).is_ok());
    }

    #[test]
    fn image_size_must_be_supported() {
        let agent = AgentKind::ImageAgent;
        assert!(agent.validate_input(&json!({"prompt": "cover", "size": "1792x1024"})).is_ok());
        for size in [json!("1x1?text=x&y=z"), json!("2048x2048"), json!(512)] {
            assert!(matches!(
                agent.validate_input(&json!({"prompt": "cover", "size": size})),
                Err(AiError::InvalidInput(_))
            ));
        }
    }
}
