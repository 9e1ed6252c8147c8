//! Error types for the queue broker.

use thiserror::Error;

/// Errors that can occur while talking to the broker.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying Redis command, script, or connection failed. Covers
    /// both transport errors and script errors (malformed EVAL, wrong key
    /// count) — Redis reports both as a `RedisError`.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to serialize a payload to JSON.
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A queue name would produce a malformed Redis hash tag, e.g. it
    /// contains `{` or `}`.
    #[error("invalid queue name '{0}': must not contain '{{' or '}}'")]
    InvalidQueueName(String),

    /// A caller-supplied error, for cases embedding crates need to surface
    /// something outside the variants above.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Build a custom error.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Self::Custom(s.to_string())
    }
}
