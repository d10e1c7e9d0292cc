use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus connection lost: {0}")]
    Disconnected(String),

    #[error("Send failed on topic '{topic}': {reason}")]
    Send { topic: String, reason: String },

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Settlement failed: {0}")]
    Settle(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
