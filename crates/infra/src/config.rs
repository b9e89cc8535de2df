//! Process configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },

    #[error("MOCK_DB=false requires DATABASE_URL")]
    MissingDatabaseUrl,

    #[error("RENDER_MIN_SECS ({min}) must not exceed RENDER_MAX_SECS ({max})")]
    RenderRange { min: u64, max: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    /// In-memory stores instead of Postgres.
    pub mock_db: bool,
    /// `None` selects the mock AI client.
    pub openai: Option<OpenAiSettings>,
    pub ai_timeout: Duration,
    pub render_min: Duration,
    pub render_max: Duration,
    pub upgrade_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                var: "BIND_ADDR",
                value: v,
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let database_url = get("DATABASE_URL");
        let mock_db = match get("MOCK_DB") {
            Some(v) => parse_bool("MOCK_DB", &v)?,
            None => database_url.is_none(),
        };
        if !mock_db && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let openai = get("OPENAI_API_KEY").map(|api_key| OpenAiSettings {
            api_key,
            base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            chat_model: get("OPENAI_CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            image_model: get("OPENAI_IMAGE_MODEL").unwrap_or_else(|| "dall-e-3".to_string()),
        });

        let ai_timeout = parse_secs("AI_TIMEOUT_SECS", get("AI_TIMEOUT_SECS"), 60)?;
        let render_min = parse_secs("RENDER_MIN_SECS", get("RENDER_MIN_SECS"), 3)?;
        let render_max = parse_secs("RENDER_MAX_SECS", get("RENDER_MAX_SECS"), 10)?;
        if render_min > render_max {
            return Err(ConfigError::RenderRange {
                min: render_min.as_secs(),
                max: render_max.as_secs(),
            });
        }

        Ok(Self {
            bind_addr,
            database_url,
            mock_db,
            openai,
            ai_timeout,
            render_min,
            render_max,
            upgrade_url: get("UPGRADE_URL").unwrap_or_else(|| "/pricing".to_string()),
        })
    }

    /// In-memory, mock-AI configuration with fast renders (tests/dev).
    pub fn in_memory() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: None,
            mock_db: true,
            openai: None,
            ai_timeout: Duration::from_secs(5),
            render_min: Duration::ZERO,
            render_max: Duration::from_millis(20),
            upgrade_url: "/pricing".to_string(),
        }
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_secs(
    var: &'static str,
    value: Option<String>,
    default: u64,
) -> Result<Duration, ConfigError> {
    match value {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid { var, value: v }),
        None => Ok(Duration::from_secs(default)),
    }
}
