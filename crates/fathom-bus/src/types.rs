use serde::Serialize;
use uuid::Uuid;

/// One bus message: a JSON body plus the routing identifiers the pipeline
/// relies on. `session_id` drives per-session FIFO delivery; `message_id`
/// identifies the message in logs and broker bookkeeping.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub body: String,
    pub session_id: String,
    pub message_id: String,
}

impl BusMessage {
    pub fn new(body: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            session_id: session_id.into(),
            message_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Serialize an event payload into a message body.
    pub fn from_event<T: Serialize>(event: &T, session_id: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_string(event)?, session_id))
    }
}
