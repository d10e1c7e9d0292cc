use serde_json::Value;

/// Memory categories rendered into the system prompt, with their headings.
/// Order matters: preferences first, then durable facts about the user.
const MEMORY_SECTIONS: &[(&str, &str)] = &[
    ("output_preferences", "Output preferences"),
    ("personal_preferences", "How to address them"),
    ("assistant_preferences", "Assistant behavior preferences"),
    ("knowledge", "Topics they know well"),
    ("interests", "Interests"),
    ("dislikes", "Dislikes"),
    ("family_and_friends", "Family and friends"),
    ("work_profile", "Work"),
    ("goals", "Goals"),
];

/// Render the session's pinned system prompt, folding in whatever user
/// memory the read API returned. An empty or absent profile renders the
/// bare persona, so a memory outage never blocks a turn.
pub fn render_system_prompt(user_memory: &Value) -> String {
    let mut prompt = String::from(
        "You are a helpful, attentive assistant. You keep answers concise unless the user \
         asks for depth, you ask a clarifying question when a request is ambiguous, and you \
         never invent facts about the user.\n\
         \n\
         You can search the user's previous conversations with the \
         search_conversation_history tool when they refer back to something you discussed \
         before.",
    );

    let mut sections = String::new();
    for (field, heading) in MEMORY_SECTIONS {
        let Some(items) = user_memory.get(*field).and_then(|v| v.as_array()) else {
            continue;
        };
        let entries: Vec<&str> = items.iter().filter_map(|v| v.as_str()).filter(|s| !s.is_empty()).collect();
        if entries.is_empty() {
            continue;
        }
        sections.push_str(&format!("\n{}: {}", heading, entries.join("; ")));
    }

    if !sections.is_empty() {
        prompt.push_str(
            "\n\nWhat you remember about this user from earlier sessions (use it naturally, \
             do not recite it back):",
        );
        prompt.push_str(&sections);
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_memory_renders_bare_persona() {
        let prompt = render_system_prompt(&json!({}));
        assert!(prompt.contains("helpful, attentive assistant"));
        assert!(!prompt.contains("What you remember"));
    }

    #[test]
    fn populated_fields_become_sections() {
        let memory = json!({
            "interests": ["astronomy", "baking"],
            "goals": ["run a marathon"],
            "dislikes": [],
        });
        let prompt = render_system_prompt(&memory);
        assert!(prompt.contains("Interests: astronomy; baking"));
        assert!(prompt.contains("Goals: run a marathon"));
        assert!(!prompt.contains("Dislikes"));
    }

    #[test]
    fn non_array_fields_are_ignored() {
        let memory = json!({ "interests": "not-a-list", "userId": "u1" });
        let prompt = render_system_prompt(&memory);
        assert!(!prompt.contains("What you remember"));
    }
}
