//! `productify-ai`
//!
//! **Responsibility:** the AI provider boundary.
//!
//! - `agent`: the catalog of named agents, their fixed credit costs and input rules.
//! - `client`: the [`AiClient`] seam every agent call goes through.
//! - `openai`: the OpenAI chat/image implementation.
//! - `mock`: deterministic placeholder output when no API key is configured.
//!
//! Nothing here knows about users, credits or jobs.

pub mod agent;
pub mod client;
pub mod error;
pub mod mock;
pub mod openai;

pub use agent::{AgentKind, UnknownAgent};
pub use client::{AiClient, ChatMessage, ChatRequest, ChatRole, IMAGE_SIZES, ImageRequest};
pub use error::AiError;
pub use mock::MockAiClient;
pub use openai::{OpenAiClient, OpenAiConfig};
