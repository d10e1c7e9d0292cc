//! Structured extraction: conversation analysis and user-profile updates.
//!
//! Both calls use the strict JSON-schema response format. A response that
//! fails to parse against the schema degrades (neutral analysis, no
//! profile updates) instead of failing the message — the LLM misbehaving
//! is a semantic problem a redelivery would not fix.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use fathom_core::types::{Conversation, Role, Sentiment, UserMemoryDocument};
use fathom_llm::{ChatApi, ChatMessage, ChatRequest, JsonSchemaFormat, LlmError};

const MAX_THEMES: usize = 5;

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a conversation analyzer. Analyze the following \
    conversation and extract key information.\n\n\
    Focus on:\n\
    - Creating a concise paragraph summary of the conversation\n\
    - Identifying key topics/themes discussed (maximum 5)\n\
    - Finding people mentioned by name (excluding the user and assistant)\n\
    - Locating specific places or locations mentioned\n\
    - Determining the overall user sentiment\n\n\
    Focus on factual information and avoid speculation. It is OK to return an empty field \
    if not applicable. Return structured data following the specified schema.";

/// Structured result of one conversation analysis.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationAnalysis {
    pub summary: String,
    pub themes: Vec<String>,
    pub persons: Vec<String>,
    pub places: Vec<String>,
    pub user_sentiment: Sentiment,
}

impl ConversationAnalysis {
    pub fn neutral(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            themes: Vec::new(),
            persons: Vec::new(),
            places: Vec::new(),
            user_sentiment: Sentiment::Neutral,
        }
    }
}

fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "summary": { "type": "string", "description": "A concise paragraph summarizing the conversation" },
            "themes": { "type": "array", "items": { "type": "string" }, "description": "Key topics discussed (max 5)" },
            "persons": { "type": "array", "items": { "type": "string" }, "description": "People mentioned by name, excluding the user and assistant" },
            "places": { "type": "array", "items": { "type": "string" }, "description": "Specific locations mentioned" },
            "user_sentiment": { "type": "string", "enum": ["positive", "neutral", "negative"] }
        },
        "required": ["summary", "themes", "persons", "places", "user_sentiment"]
    })
}

/// Summarize one conversation. LLM transport/API errors propagate (the
/// message should be redelivered); schema violations degrade to a neutral
/// analysis.
pub async fn extract_summary(
    chat: &dyn ChatApi,
    conversation: &Conversation,
) -> Result<ConversationAnalysis, LlmError> {
    if conversation.messages.is_empty() {
        return Ok(ConversationAnalysis::neutral("Empty conversation"));
    }

    let request = ChatRequest {
        messages: vec![
            ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Analyze this conversation:\n\n{}",
                conversation_text(conversation)
            )),
        ],
        temperature: Some(0.1),
        max_tokens: Some(1000),
        response_format: Some(JsonSchemaFormat {
            name: "ConversationAnalysis".to_string(),
            description: "Structured analysis of a conversation including summary, themes, \
                persons, places, and user sentiment"
                .to_string(),
            schema: analysis_schema(),
        }),
        ..Default::default()
    };

    let response = chat.complete(&request).await?;
    match serde_json::from_str::<ConversationAnalysis>(&response.content) {
        Ok(mut analysis) => {
            analysis.themes.truncate(MAX_THEMES);
            Ok(analysis)
        }
        Err(e) => {
            warn!(error = %e, content = %response.content, "analysis failed schema validation");
            Ok(ConversationAnalysis::neutral("Failed to analyze conversation"))
        }
    }
}

/// Text fed to the embedding model: every extracted field, one per line,
/// so vector search matches on themes and entities as well as the summary.
pub fn embedding_text(analysis: &ConversationAnalysis) -> String {
    let sentiment = match analysis.user_sentiment {
        Sentiment::Positive => "positive",
        Sentiment::Neutral => "neutral",
        Sentiment::Negative => "negative",
    };
    format!(
        "Summary: {}\nThemes: {}\nPersons: {}\nPlaces: {}\nUser sentiment: {}",
        analysis.summary,
        analysis.themes.join(", "),
        analysis.persons.join(", "),
        analysis.places.join(", "),
        sentiment,
    )
}

/// Fully merged per-category profile lists as returned by the extractor.
/// An empty list means "nothing new for this category" and leaves the
/// stored field untouched; a non-empty list replaces it wholesale.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserMemoryUpdates {
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

fn updates_schema() -> Value {
    let string_array = |description: &str| {
        json!({ "type": "array", "items": { "type": "string" }, "description": description })
    };
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "output_preferences": string_array("User's preferred output styles"),
            "personal_preferences": string_array("How the user prefers to be addressed"),
            "assistant_preferences": string_array("User's preferences for assistant behavior"),
            "knowledge": string_array("Topics where the user demonstrates understanding"),
            "interests": string_array("User's hobbies and interests"),
            "dislikes": string_array("Things the user explicitly dislikes"),
            "family_and_friends": string_array("Personal connections the user mentions"),
            "work_profile": string_array("Professional information the user shares"),
            "goals": string_array("User's stated objectives or aspirations")
        },
        "required": [
            "output_preferences", "personal_preferences", "assistant_preferences",
            "knowledge", "interests", "dislikes", "family_and_friends",
            "work_profile", "goals"
        ]
    })
}

fn updates_system_prompt(existing: &UserMemoryDocument) -> String {
    let existing_json =
        serde_json::to_string_pretty(existing).unwrap_or_else(|_| "{}".to_string());
    format!(
        "You are a user memory extractor. Based on the conversation, identify any new \
         information about the user that should be added to their memory profile.\n\n\
         Current user memory profile (if any):\n{existing_json}\n\n\
         From the conversation, extract ONLY NEW information in these categories:\n\
         - output_preferences: User's preferred output styles (length, detail, format)\n\
         - personal_preferences: How user prefers to be addressed (name, pronouns, tone)\n\
         - assistant_preferences: User's preferences for assistant behavior (name, style)\n\
         - knowledge: Topics where user demonstrates understanding (add to existing)\n\
         - interests: User's hobbies, interests, subjects they enjoy (add to existing)\n\
         - dislikes: Topics, styles, or things user explicitly dislikes (add to existing)\n\
         - family_and_friends: Personal connections user mentions (merge with existing)\n\
         - work_profile: Professional information user shares (merge with existing)\n\
         - goals: User's stated objectives or aspirations (add to existing)\n\n\
         All extracted information should be from user messages in the conversation. Do not \
         include assistant messages or system prompts. Those are provided for context only.\n\n\
         If new and existing information overlaps, merge them intelligently. For example, if \
         user mentions a new interest that is similar to an existing one, combine them.\n\n\
         IMPORTANT: You must provide values for ALL fields in the response. If there is no \
         information for a category, provide an empty array [] for lists."
    )
}

/// Extract profile updates from a finished conversation. `Ok(None)` when
/// there is nothing to learn from (no user messages) or the response
/// failed schema validation.
pub async fn extract_user_memory_updates(
    chat: &dyn ChatApi,
    conversation: &Conversation,
    existing: &UserMemoryDocument,
) -> Result<Option<UserMemoryUpdates>, LlmError> {
    let has_user_messages = conversation.messages.iter().any(|m| m.role == Role::User);
    if conversation.messages.is_empty() || !has_user_messages {
        return Ok(None);
    }

    let request = ChatRequest {
        messages: vec![
            ChatMessage::system(updates_system_prompt(existing)),
            ChatMessage::user(format!(
                "Extract new user memory information from this conversation:\n\n{}",
                conversation_text(conversation)
            )),
        ],
        temperature: Some(0.1),
        max_tokens: Some(1000),
        response_format: Some(JsonSchemaFormat {
            name: "UserMemoryUpdates".to_string(),
            description: "Updates to user memory based on conversation analysis".to_string(),
            schema: updates_schema(),
        }),
        ..Default::default()
    };

    let response = chat.complete(&request).await?;
    match serde_json::from_str::<UserMemoryUpdates>(&response.content) {
        Ok(updates) => Ok(Some(updates)),
        Err(e) => {
            warn!(error = %e, content = %response.content, "memory updates failed schema validation");
            Ok(None)
        }
    }
}

/// Replace every field the extractor populated; leave the rest untouched.
/// Returns the names of the replaced fields (empty means nothing changed).
pub fn apply_updates(
    document: &mut UserMemoryDocument,
    updates: &UserMemoryUpdates,
) -> Vec<&'static str> {
    let mut changed = Vec::new();
    let pairs: [(&'static str, &Vec<String>, &mut Vec<String>); 9] = [
        ("output_preferences", &updates.output_preferences, &mut document.output_preferences),
        ("personal_preferences", &updates.personal_preferences, &mut document.personal_preferences),
        ("assistant_preferences", &updates.assistant_preferences, &mut document.assistant_preferences),
        ("knowledge", &updates.knowledge, &mut document.knowledge),
        ("interests", &updates.interests, &mut document.interests),
        ("dislikes", &updates.dislikes, &mut document.dislikes),
        ("family_and_friends", &updates.family_and_friends, &mut document.family_and_friends),
        ("work_profile", &updates.work_profile, &mut document.work_profile),
        ("goals", &updates.goals, &mut document.goals),
    ];
    for (name, incoming, stored) in pairs {
        if !incoming.is_empty() {
            *stored = incoming.clone();
            changed.push(name);
        }
    }
    changed
}

fn conversation_text(conversation: &Conversation) -> String {
    let mut text = String::new();
    for message in &conversation.messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        text.push_str(&format!("{}: {}\n", role, message.content));
    }
    text
}
