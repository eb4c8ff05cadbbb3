//! Crate-wide error type.
//!
//! Every fallible boundary returns `Result<T, DprError>` instead of `unwrap()`.

use thiserror::Error;

/// Error kinds for the daily-paper-reader pipeline.
#[derive(Debug, Error)]
pub enum DprError {
    /// Missing env var, malformed profile, bad config section.
    #[error("config error: {0}")]
    Config(String),

    /// Transient network failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Explicit 429 or a local token bucket exhausted; retry after N seconds.
    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Requested paper id not present in the source.
    #[error("not found: {0}")]
    NotFound(String),

    /// JSON or LLM-output decoding failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// LLM or rerank provider returned an explicit error envelope.
    #[error("provider error: {code} - {message}")]
    Provider {
        /// Provider-reported error code, if any ("" when absent).
        code: String,
        /// Provider-reported error message.
        message: String,
    },

    /// Unrecoverable: corrupt archive, impossible state.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias using [`DprError`].
pub type Result<T> = std::result::Result<T, DprError>;

/// Extension trait for adding context to `Option` types.
pub trait OptionExt<T> {
    /// Convert `Option` to `Result`, producing a [`DprError::Parse`] on `None`.
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| DprError::Parse(msg.to_string()))
    }
}
