use crate::types::Usage;

/// Events emitted during a streaming chat completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental assistant text. Chunk boundaries are preserved exactly
    /// as the API sent them.
    TextDelta { text: String },

    /// Fragment of a tool call. `index` is stable across the fragments of
    /// one call; `id` may only appear on a later fragment.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },

    /// Token usage, reported on the final chunk when requested.
    Usage(Usage),

    /// Stream completed.
    Done { finish_reason: String },

    /// Error during streaming; no further events follow.
    Error { message: String },
}

/// Parse a single SSE line.
/// SSE format: `event: <type>` / `data: <json>` lines separated by blank lines.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_and_event_lines() {
        assert!(matches!(
            parse_sse_line("data: {\"x\":1}"),
            Some(SseParsed::Data(d)) if d == "{\"x\":1}"
        ));
        assert!(matches!(
            parse_sse_line("event: done"),
            Some(SseParsed::Event(e)) if e == "done"
        ));
        assert!(parse_sse_line(": keepalive").is_none());
    }
}
