pub mod chat;

use thiserror::Error;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("API key is not configured")]
    MissingApiKey,
    #[error("rate limited by provider (HTTP {status}): {body}")] RateLimited {
        status: u16,
        body: String,
    },
    #[error("provider returned HTTP {status}: {body}")] Api {
        status: u16,
        body: String,
    },
    #[error("http: {0}")] Http(reqwest::Error),
    #[error("invalid endpoint url: {0}")] Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs may carry credentials.
        ChatError::Http(err.without_url())
    }
}
