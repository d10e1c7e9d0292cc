use tracing::{info, warn};

use fathom_core::types::{Conversation, Role};
use fathom_llm::{ChatApi, ChatMessage, ChatRequest};

pub const FALLBACK_TITLE: &str = "New Conversation";

/// Titles are UI chrome: short, plain, no punctuation that breaks lists.
const MAX_TITLE_CHARS: usize = 50;
/// First three exchanges are enough to name a conversation.
const EXCERPT_MESSAGES: usize = 6;
const EXCERPT_CONTENT_CHARS: usize = 150;

const TITLE_SYSTEM_PROMPT: &str = "You are a helpful assistant that generates concise \
    conversation titles. Analyze the conversation and generate a short, descriptive title \
    (3-6 words) that captures the main topic or theme. Do not use quotes or special \
    characters. Return only the title.";

/// Synthesize a title for a conversation that does not have one. Never
/// fails: any LLM problem falls back to the default so title generation
/// cannot block persistence.
pub async fn generate_title(chat: &dyn ChatApi, conversation: &Conversation) -> String {
    if let Some(title) = &conversation.title {
        if !title.is_empty() {
            return title.clone();
        }
    }

    let Some(excerpt) = conversation_excerpt(conversation) else {
        return FALLBACK_TITLE.to_string();
    };

    let request = ChatRequest {
        messages: vec![
            ChatMessage::system(TITLE_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Generate a descriptive title for this conversation:\n\n{excerpt}"
            )),
        ],
        max_tokens: Some(25),
        temperature: Some(0.3),
        ..Default::default()
    };

    match chat.complete(&request).await {
        Ok(response) => {
            let title = clean_title(&response.content);
            info!(title = %title, messages = conversation.messages.len(), "generated conversation title");
            title
        }
        Err(e) => {
            warn!(error = %e, "title generation failed, using fallback");
            FALLBACK_TITLE.to_string()
        }
    }
}

/// Render the first exchanges as `User:`/`Assistant:` lines, truncating
/// each message body. `None` when there is nothing titleable.
fn conversation_excerpt(conversation: &Conversation) -> Option<String> {
    let mut lines = Vec::new();
    for message in conversation.messages.iter().take(EXCERPT_MESSAGES) {
        let speaker = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System | Role::Tool => continue,
        };
        let content: String = message.content.chars().take(EXCERPT_CONTENT_CHARS).collect();
        lines.push(format!("{speaker}: {content}"));
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Strip quoting and colons, cap the length, fall back when nothing is left.
pub fn clean_title(raw: &str) -> String {
    let mut title: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | ':'))
        .collect();
    if title.chars().count() > MAX_TITLE_CHARS {
        title = title.chars().take(MAX_TITLE_CHARS).collect();
        title = title.trim_end().to_string();
    }
    let title = title.trim().to_string();
    if title.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    use fathom_llm::scripted::ScriptedChat;

    fn conversation_with(messages: &[(&str, Role)]) -> Conversation {
        let now = Utc::now();
        let mut conversation = Conversation::new("s1", "u1", now);
        for (i, (content, role)) in messages.iter().enumerate() {
            conversation.push_message(&format!("m{i}"), "x", *role, content, now);
        }
        conversation
    }

    #[test]
    fn clean_strips_quotes_and_colons_and_caps_length() {
        assert_eq!(clean_title("\"Trip: to 'Japan'\""), "Trip to Japan");
        let long = "a".repeat(80);
        assert_eq!(clean_title(&long).chars().count(), 50);
        assert_eq!(clean_title("  \"':  "), FALLBACK_TITLE);
    }

    #[tokio::test]
    async fn existing_title_is_returned_without_an_llm_call() {
        let chat = Arc::new(ScriptedChat::new());
        let mut conversation = conversation_with(&[("hi", Role::User)]);
        conversation.title = Some("Existing".to_string());
        let title = generate_title(chat.as_ref(), &conversation).await;
        assert_eq!(title, "Existing");
        assert!(chat.requests().is_empty());
    }

    #[tokio::test]
    async fn excerpt_truncates_content_and_skips_system_messages() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push_text_completion("Long Message Chat");
        let long = "x".repeat(400);
        let conversation = conversation_with(&[
            ("pinned instruction", Role::System),
            (long.as_str(), Role::User),
            ("short reply", Role::Assistant),
        ]);
        generate_title(chat.as_ref(), &conversation).await;

        let prompt = chat.requests()[0].messages[1].content.clone().unwrap();
        assert!(!prompt.contains("pinned instruction"));
        assert!(prompt.contains(&format!("User: {}", "x".repeat(150))));
        assert!(!prompt.contains(&"x".repeat(151)));
    }

    #[tokio::test]
    async fn llm_failure_falls_back() {
        let chat = Arc::new(ScriptedChat::new());
        chat.fail_next(1);
        let conversation = conversation_with(&[("hi", Role::User)]);
        assert_eq!(generate_title(chat.as_ref(), &conversation).await, FALLBACK_TITLE);
    }

    #[tokio::test]
    async fn conversation_without_user_or_assistant_messages_falls_back() {
        let chat = Arc::new(ScriptedChat::new());
        let conversation = conversation_with(&[("pinned", Role::System)]);
        assert_eq!(generate_title(chat.as_ref(), &conversation).await, FALLBACK_TITLE);
        assert!(chat.requests().is_empty());
    }

    #[tokio::test]
    async fn generated_titles_satisfy_the_bounds() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push_text_completion("\"Planning: a 'very' long vacation itinerary across southern Europe this autumn\"");
        let conversation = conversation_with(&[("hi", Role::User)]);
        let title = generate_title(chat.as_ref(), &conversation).await;
        assert!(title.chars().count() <= 50);
        assert!(!title.contains('"') && !title.contains('\'') && !title.contains(':'));
    }
}
