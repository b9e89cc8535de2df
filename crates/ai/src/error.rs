use thiserror::Error;

/// Failure of an AI provider call.
///
/// Callers branch on the variant, never on message text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    /// Provider rate limit or billing quota hit (HTTP 429).
    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Missing or rejected API key (HTTP 401).
    #[error("invalid API key: {0}")]
    InvalidApiKey(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Connection, TLS or timeout failure inside the HTTP client.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered 2xx but the body was not what we expected.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid agent input: {0}")]
    InvalidInput(String),
}
