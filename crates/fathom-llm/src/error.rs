use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("Failed to parse LLM response: {0}")]
    Parse(String),

    #[error("LLM stream aborted: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
