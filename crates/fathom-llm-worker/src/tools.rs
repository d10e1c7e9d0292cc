use fathom_llm::ToolDefinition;

pub const SEARCH_TOOL_NAME: &str = "search_conversation_history";

/// The one tool offered on every turn: semantic search over the user's
/// past conversations, served by the memory read API.
pub fn search_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: SEARCH_TOOL_NAME.to_string(),
        description: "Search through the user's previous conversations using semantic search. \
            This tool finds relevant past conversations based on topics, themes, or context \
            rather than exact keyword matching.\n\n\
            Use this tool when:\n\
            - User references something they discussed before\n\
            - User asks about previous topics or conversations\n\
            - You need context from past interactions\n\
            - User wants to continue a previous discussion\n\n\
            The tool returns conversation summaries with themes, people and places mentioned, \
            user sentiment, a relevance score, and the conversation timestamp."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "search_query": {
                    "type": "string",
                    "description": "Semantic search query describing what to look for in previous \
                        conversations. Use natural language describing topics, themes, or context \
                        rather than exact keywords. Examples: 'vacation planning', 'work stress \
                        discussion', 'technical programming questions'"
                },
                "limit": {
                    "type": "integer",
                    "description": "Number of most relevant conversations to return (1-10). Use \
                        smaller numbers (1-3) for specific searches, larger numbers (5-10) for \
                        broader context gathering",
                    "minimum": 1,
                    "maximum": 10,
                    "default": 5
                }
            },
            "required": ["search_query"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_requires_search_query_only() {
        let def = search_tool_definition();
        assert_eq!(def.name, SEARCH_TOOL_NAME);
        assert_eq!(def.parameters["required"], serde_json::json!(["search_query"]));
        assert_eq!(def.parameters["properties"]["limit"]["default"], 5);
    }
}
