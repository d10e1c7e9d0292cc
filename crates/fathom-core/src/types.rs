use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message inside a conversation, in LLM wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation recorded on an assistant message.
/// Matches the chat-completions wire shape so it round-trips unchanged
/// between the cache, the history store, and follow-up LLM calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolFunctionRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunctionRecord {
    pub name: String,
    /// Raw JSON argument string, exactly as the model emitted it.
    pub arguments: String,
}

impl ToolCallRecord {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: ToolFunctionRecord {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// One message of a cached conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl StoredMessage {
    pub fn new(message_id: impl Into<String>, role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_id: message_id.into(),
            role,
            content: content.into(),
            timestamp,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Per-session conversation state held in the cache under `session:{sessionId}`.
///
/// The whole value is rewritten on every update; `userId` never changes
/// after creation and the first message, when present with role `system`,
/// is the session's pinned instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastActivity")]
    pub last_activity: DateTime<Utc>,
    pub title: Option<String>,
    pub messages: Vec<StoredMessage>,
}

impl Conversation {
    /// Fresh conversation for a session's first turn. Title is assigned
    /// later by the history worker.
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            created_at: now,
            last_activity: now,
            title: None,
            messages: Vec::new(),
        }
    }

    /// Whether the pinned system instruction is already present.
    pub fn has_system_head(&self) -> bool {
        self.messages
            .first()
            .map(|m| m.role == Role::System)
            .unwrap_or(false)
    }

    /// Append one message with a derived id (`{chatMessageId}_{suffix}`).
    pub fn push_message(&mut self, chat_message_id: &str, suffix: &str, role: Role, content: &str, now: DateTime<Utc>) {
        self.messages.push(StoredMessage::new(
            format!("{chat_message_id}_{suffix}"),
            role,
            content,
            now,
        ));
    }
}

/// Overall sentiment of the user across one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

// ---------------------------------------------------------------------------
// Bus event payloads
// ---------------------------------------------------------------------------

/// A user's chat turn as deposited by the ingress on `user-messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequestEvent {
    pub text: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "chatMessageId")]
    pub chat_message_id: String,
    /// Requests from unauthenticated ingress paths may omit this; memory
    /// enrichment is skipped for them but the turn still runs.
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

/// One token chunk (or the end-of-stream sentinel) on `token-streams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEvent {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "chatMessageId")]
    pub chat_message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_stream: Option<bool>,
}

impl TokenEvent {
    pub fn token(session_id: &str, chat_message_id: &str, token: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            chat_message_id: chat_message_id.to_string(),
            token: Some(token.into()),
            end_of_stream: None,
        }
    }

    pub fn end_of_stream(session_id: &str, chat_message_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            chat_message_id: chat_message_id.to_string(),
            token: None,
            end_of_stream: Some(true),
        }
    }
}

/// Fan-out event on `message-completed`, consumed by the history and
/// memory workers through independent subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "chatMessageId")]
    pub chat_message_id: String,
    #[serde(rename = "completedAt")]
    pub completed_at: DateTime<Utc>,
    #[serde(rename = "eventType")]
    pub event_type: String,
}

impl CompletionEvent {
    pub const EVENT_TYPE: &'static str = "message_completed";

    pub fn new(session_id: &str, user_id: &str, chat_message_id: &str, completed_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            chat_message_id: chat_message_id.to_string(),
            completed_at,
            event_type: Self::EVENT_TYPE.to_string(),
        }
    }

    /// Bus message id — distinct from the request id so a completion is
    /// never deduplicated against its originating chat request.
    pub fn bus_message_id(&self) -> String {
        format!("{}_completed", self.chat_message_id)
    }
}

// ---------------------------------------------------------------------------
// Store documents
// ---------------------------------------------------------------------------

/// Durable conversation mirror written by the history worker.
/// Document id and partition are both the session id, so redelivered
/// completions converge on the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub title: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastActivity")]
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<StoredMessage>,
    #[serde(rename = "persistedAt")]
    pub persisted_at: DateTime<Utc>,
}

impl HistoryDocument {
    pub fn from_conversation(conversation: &Conversation, title: Option<String>, persisted_at: DateTime<Utc>) -> Self {
        Self {
            id: conversation.session_id.clone(),
            session_id: conversation.session_id.clone(),
            user_id: conversation.user_id.clone(),
            title,
            created_at: conversation.created_at,
            last_activity: conversation.last_activity,
            messages: conversation.messages.clone(),
            persisted_at,
        }
    }
}

/// Per-conversation semantic memory with its vector embedding, written by
/// the memory worker and searched by the memory read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMemoryDocument {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    pub themes: Vec<String>,
    pub persons: Vec<String>,
    pub places: Vec<String>,
    pub user_sentiment: Sentiment,
    /// Empty when embedding failed; vector search skips empty vectors.
    pub vector_embedding: Vec<f32>,
}

impl ConversationMemoryDocument {
    pub fn document_id(session_id: &str, user_id: &str) -> String {
        format!("{session_id}_{user_id}")
    }
}

/// Consolidated per-user profile. Every array field holds the current
/// merged view, not an append log: the extractor returns fully merged
/// lists and each non-empty result replaces the stored field wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemoryDocument {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub output_preferences: Vec<String>,
    #[serde(default)]
    pub personal_preferences: Vec<String>,
    #[serde(default)]
    pub assistant_preferences: Vec<String>,
    #[serde(default)]
    pub knowledge: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub dislikes: Vec<String>,
    #[serde(default)]
    pub family_and_friends: Vec<String>,
    #[serde(default)]
    pub work_profile: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
}

impl UserMemoryDocument {
    /// Zero-initialized profile for a user seen for the first time.
    pub fn empty(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: user_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: now,
            output_preferences: Vec::new(),
            personal_preferences: Vec::new(),
            assistant_preferences: Vec::new(),
            knowledge: Vec::new(),
            interests: Vec::new(),
            dislikes: Vec::new(),
            family_and_friends: Vec::new(),
            work_profile: Vec::new(),
            goals: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_serializes_with_wire_field_names() {
        let now = Utc::now();
        let mut conv = Conversation::new("s1", "u1", now);
        conv.push_message("m1", "user", Role::User, "hello", now);

        let json = serde_json::to_value(&conv).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["userId"], "u1");
        assert!(json["createdAt"].is_string());
        assert_eq!(json["messages"][0]["messageId"], "m1_user");
        assert_eq!(json["messages"][0]["role"], "user");
        // absent tool fields are omitted entirely, not serialized as null
        assert!(json["messages"][0].get("tool_calls").is_none());
    }

    #[test]
    fn system_head_detection() {
        let now = Utc::now();
        let mut conv = Conversation::new("s1", "u1", now);
        assert!(!conv.has_system_head());
        conv.push_message("m1", "user", Role::User, "hi", now);
        assert!(!conv.has_system_head());

        let mut conv2 = Conversation::new("s2", "u1", now);
        conv2.push_message("m1", "system", Role::System, "You are helpful.", now);
        assert!(conv2.has_system_head());
    }

    #[test]
    fn token_event_wire_shapes() {
        let tok = TokenEvent::token("s1", "m1", "Hel");
        let json = serde_json::to_value(&tok).unwrap();
        assert_eq!(json["token"], "Hel");
        assert!(json.get("end_of_stream").is_none());

        let eos = TokenEvent::end_of_stream("s1", "m1");
        let json = serde_json::to_value(&eos).unwrap();
        assert_eq!(json["end_of_stream"], true);
        assert!(json.get("token").is_none());
    }

    #[test]
    fn completion_event_bus_message_id() {
        let ev = CompletionEvent::new("s1", "u1", "m42", Utc::now());
        assert_eq!(ev.bus_message_id(), "m42_completed");
        assert_eq!(ev.event_type, "message_completed");
    }

    #[test]
    fn conversation_memory_document_id() {
        assert_eq!(ConversationMemoryDocument::document_id("s1", "u1"), "s1_u1");
    }
}
