pub mod chat;

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// Replaces the per-tool model for every request when set.
    pub model_override: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key is not configured")]
    MissingApiKey,

    #[error("Invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote service returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("Remote service returned no text: {0}")]
    EmptyResponse(String),
}
