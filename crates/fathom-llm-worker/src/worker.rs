use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

use fathom_bus::{BusMessage, SenderPool, TopicSender};
use fathom_cache::SessionCache;
use fathom_core::config::SESSION_TTL_SECS;
use fathom_core::telemetry::message_span;
use fathom_core::types::{
    ChatRequestEvent, CompletionEvent, Conversation, Role, StoredMessage, TokenEvent,
    ToolCallRecord,
};
use fathom_llm::{ChatApi, ChatMessage, ChatRequest, StreamEvent, ToolCall, ToolCallAccumulator};
use fathom_runtime::MessageProcessor;

use crate::memory_api::MemoryApi;
use crate::prompt;
use crate::tools;

/// Processes one chat request into a streamed assistant turn: history load,
/// memory-aware system prompt, streaming completion with a bounded tool
/// loop, token fan-out, cache persistence, completion announcement.
pub struct LlmWorker {
    cache: Arc<dyn SessionCache>,
    chat: Arc<dyn ChatApi>,
    memory: Arc<dyn MemoryApi>,
    tokens: Arc<SenderPool>,
    completions: Arc<dyn TopicSender>,
    tool_loop_max_rounds: u32,
    record_memory_content: bool,
}

impl LlmWorker {
    pub fn new(
        cache: Arc<dyn SessionCache>,
        chat: Arc<dyn ChatApi>,
        memory: Arc<dyn MemoryApi>,
        tokens: Arc<SenderPool>,
        completions: Arc<dyn TopicSender>,
        tool_loop_max_rounds: u32,
        record_memory_content: bool,
    ) -> Self {
        Self {
            cache,
            chat,
            memory,
            tokens,
            completions,
            tool_loop_max_rounds,
            record_memory_content,
        }
    }

    async fn run_turn(&self, request: &ChatRequestEvent) -> anyhow::Result<()> {
        info!(text_len = request.text.len(), "processing chat request");

        // Cross-user isolation: a cached session owned by another user is
        // treated as absent, never as history.
        let history = self
            .cache
            .get(&request.session_id)
            .await
            .context("read conversation history")?
            .filter(|conversation| {
                if conversation.user_id == request.user_id {
                    true
                } else {
                    warn!(
                        cached_user = %conversation.user_id,
                        "session does not belong to requesting user, ignoring history"
                    );
                    false
                }
            });

        let has_system_head = history
            .as_ref()
            .map(Conversation::has_system_head)
            .unwrap_or(false);

        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut system_content: Option<String> = None;
        if !has_system_head {
            let user_memory = self.memory.fetch_user_memory(&request.user_id).await;
            if self.record_memory_content {
                debug!(memory = %user_memory, "user memory for system prompt");
            }
            let rendered = prompt::render_system_prompt(&user_memory);
            messages.push(ChatMessage::system(&rendered));
            system_content = Some(rendered);
        }
        if let Some(conversation) = &history {
            messages.extend(conversation.messages.iter().map(ChatMessage::from));
        }
        messages.push(ChatMessage::user(&request.text));

        let assistant_text = self.stream_turn(request, &mut messages).await?;

        self.publish_token(TokenEvent::end_of_stream(
            &request.session_id,
            &request.chat_message_id,
        ))
        .await
        .context("publish end-of-stream")?;
        info!("sent end-of-stream");

        // Persist the turn. The cache is best-effort here: losing it costs
        // downstream workers a retry cycle, not the user-visible reply.
        let now = Utc::now();
        let mut conversation = history
            .unwrap_or_else(|| Conversation::new(&request.session_id, &request.user_id, now));
        if let Some(system) = system_content {
            if !conversation.has_system_head() {
                // The pinned instruction always sits at the head.
                conversation.messages.insert(
                    0,
                    StoredMessage::new(
                        format!("{}_system", request.chat_message_id),
                        Role::System,
                        &system,
                        now,
                    ),
                );
            }
        }
        conversation.push_message(&request.chat_message_id, "user", Role::User, &request.text, now);
        conversation.push_message(
            &request.chat_message_id,
            "assistant",
            Role::Assistant,
            &assistant_text,
            now,
        );
        conversation.last_activity = now;
        if let Err(e) = self
            .cache
            .put(&conversation, Duration::from_secs(SESSION_TTL_SECS))
            .await
        {
            error!(error = %e, "failed to persist conversation, continuing");
        } else {
            info!(messages = conversation.messages.len(), "conversation persisted");
        }

        let completion = CompletionEvent::new(
            &request.session_id,
            &request.user_id,
            &request.chat_message_id,
            Utc::now(),
        );
        let message = BusMessage::from_event(&completion, &request.session_id)
            .context("encode completion event")?
            .with_message_id(completion.bus_message_id());
        self.completions
            .send(message)
            .await
            .context("publish message-completed event")?;
        info!("published message-completed event");
        Ok(())
    }

    /// Stream completions until the model stops asking for tools, fanning
    /// every content delta out as a token event. Returns the accumulated
    /// assistant text across all rounds.
    async fn stream_turn(
        &self,
        request: &ChatRequestEvent,
        messages: &mut Vec<ChatMessage>,
    ) -> anyhow::Result<String> {
        let mut assistant_text = String::new();
        let mut round = 0u32;

        loop {
            let chat_request = ChatRequest {
                messages: messages.clone(),
                tools: vec![tools::search_tool_definition()],
                tool_choice: Some("auto".to_string()),
                temperature: Some(0.7),
                ..Default::default()
            };

            let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
            let chat = self.chat.clone();
            let api_call =
                tokio::spawn(async move { chat.stream_chat(&chat_request, tx).await });

            let mut accumulator = ToolCallAccumulator::new();
            let mut stream_error: Option<String> = None;
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta { text } => {
                        assistant_text.push_str(&text);
                        self.publish_token(TokenEvent::token(
                            &request.session_id,
                            &request.chat_message_id,
                            text,
                        ))
                        .await
                        .context("publish token event")?;
                    }
                    StreamEvent::ToolCallDelta { .. } => accumulator.apply_event(&event),
                    StreamEvent::Usage(usage) => {
                        info!(
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "token usage"
                        );
                    }
                    StreamEvent::Done { .. } => {}
                    StreamEvent::Error { message } => stream_error = Some(message),
                }
            }
            api_call.await.context("stream task panicked")??;
            if let Some(message) = stream_error {
                anyhow::bail!("LLM stream failed: {message}");
            }

            let calls = accumulator.finish();
            if calls.is_empty() {
                return Ok(assistant_text);
            }
            if round >= self.tool_loop_max_rounds {
                warn!(round, "tool loop bound reached, returning accumulated text");
                return Ok(assistant_text);
            }
            round += 1;
            info!(count = calls.len(), round, "executing tool calls");

            messages.push(ChatMessage::assistant_tool_calls(
                calls
                    .iter()
                    .map(|c| ToolCallRecord::function(&c.id, &c.name, &c.arguments))
                    .collect(),
            ));
            for call in &calls {
                messages.push(self.execute_tool_call(call, &request.user_id).await);
            }
        }
    }

    /// Run one tool call. Never fails the turn: argument and dispatch
    /// errors become error-shaped tool messages the model can react to.
    async fn execute_tool_call(&self, call: &ToolCall, user_id: &str) -> ChatMessage {
        if call.name != tools::SEARCH_TOOL_NAME {
            warn!(tool = %call.name, "model requested unknown tool");
            return tool_error(call, format!("Unknown tool: {}", call.name));
        }

        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                warn!(arguments = %call.arguments, error = %e, "tool arguments failed to parse");
                return tool_error(call, format!("Invalid function arguments: {e}"));
            }
        };

        let query = arguments
            .get("search_query")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let limit = arguments.get("limit").and_then(|v| v.as_i64()).unwrap_or(5);
        info!(query, limit, "running conversation search");

        let result = self.memory.search_conversations(user_id, query, limit).await;
        let body = serde_json::to_string_pretty(&result)
            .unwrap_or_else(|_| "{\"conversations\": []}".to_string());
        ChatMessage::tool_result(&call.id, body)
    }

    async fn publish_token(&self, event: TokenEvent) -> anyhow::Result<()> {
        let message = BusMessage::from_event(&event, &event.session_id)?;
        self.tokens.send(message).await?;
        Ok(())
    }
}

fn tool_error(call: &ToolCall, error: String) -> ChatMessage {
    let body = serde_json::json!({ "error": error });
    ChatMessage::tool_result(&call.id, body.to_string())
}

/// Decode and validate a chat request. The error carries the reason only;
/// validation failures are terminal for the message.
fn parse_request(body: &str) -> Result<ChatRequestEvent, String> {
    let request: ChatRequestEvent =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    if request.text.is_empty() || request.session_id.is_empty() || request.chat_message_id.is_empty() {
        return Err("missing required fields (text, sessionId, chatMessageId)".to_string());
    }
    Ok(request)
}

#[async_trait]
impl MessageProcessor for LlmWorker {
    async fn process(&self, message: &BusMessage) -> anyhow::Result<()> {
        let request = match parse_request(&message.body) {
            Ok(request) => request,
            Err(reason) => {
                // Terminal: a malformed request would fail identically on
                // every redelivery. Close the client's stream and consume.
                error!(message_id = %message.message_id, reason, "malformed chat request");
                let eos = TokenEvent::end_of_stream(&message.session_id, &message.message_id);
                if let Err(e) = self.publish_token(eos).await {
                    warn!(error = %e, "failed to send end-of-stream for malformed request");
                }
                return Ok(());
            }
        };

        let span = message_span(
            "llm-worker",
            &request.session_id,
            &request.user_id,
            &request.chat_message_id,
            &message.message_id,
        );
        self.run_turn(&request).instrument(span).await
    }

    fn name(&self) -> &'static str {
        "llm-worker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    use serde_json::json;

    use fathom_bus::memory::MemoryBus;
    use fathom_bus::{BusClient, Delivery, SubscriptionReceiver};
    use fathom_cache::MemoryCache;
    use fathom_llm::scripted::ScriptedChat;

    #[test]
    fn parse_request_accepts_complete_events() {
        let body = r#"{"text":"hi","sessionId":"s1","chatMessageId":"m1","userId":"u1"}"#;
        let request = parse_request(body).unwrap();
        assert_eq!(request.session_id, "s1");
        assert_eq!(request.user_id, "u1");
    }

    #[test]
    fn parse_request_rejects_missing_fields() {
        assert!(parse_request(r#"{"text":"","sessionId":"s1","chatMessageId":"m1","userId":"u1"}"#).is_err());
        assert!(parse_request(r#"{"sessionId":"s1"}"#).is_err());
        assert!(parse_request("not json").is_err());
    }

    #[derive(Default)]
    struct StubMemoryApi {
        profile: Mutex<Value>,
        profile_fetches: Mutex<u32>,
        searches: Mutex<Vec<(String, String, i64)>>,
    }

    impl StubMemoryApi {
        fn set_profile(&self, profile: Value) {
            *self.profile.lock().unwrap() = profile;
        }

        fn fetches(&self) -> u32 {
            *self.profile_fetches.lock().unwrap()
        }

        fn searches(&self) -> Vec<(String, String, i64)> {
            self.searches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MemoryApi for StubMemoryApi {
        async fn fetch_user_memory(&self, _user_id: &str) -> Value {
            *self.profile_fetches.lock().unwrap() += 1;
            self.profile.lock().unwrap().clone()
        }

        async fn search_conversations(&self, user_id: &str, query: &str, limit: i64) -> Value {
            self.searches
                .lock()
                .unwrap()
                .push((user_id.to_string(), query.to_string(), limit));
            json!({"conversations": [], "total_found": 0, "search_query": query})
        }
    }

    struct Fixture {
        bus: MemoryBus,
        cache: Arc<MemoryCache>,
        chat: Arc<ScriptedChat>,
        memory: Arc<StubMemoryApi>,
        worker: LlmWorker,
    }

    async fn fixture() -> Fixture {
        let bus = MemoryBus::new();
        let cache = Arc::new(MemoryCache::new());
        let chat = Arc::new(ScriptedChat::new());
        let memory = Arc::new(StubMemoryApi::default());
        let tokens = Arc::new(SenderPool::new(vec![bus
            .topic_sender("token-streams")
            .await
            .unwrap()]));
        let completions = bus.topic_sender("message-completed").await.unwrap();
        let worker = LlmWorker::new(
            cache.clone(),
            chat.clone(),
            memory.clone(),
            tokens,
            completions,
            3,
            false,
        );
        Fixture {
            bus,
            cache,
            chat,
            memory,
            worker,
        }
    }

    fn request_message(text: &str, session: &str, chat_id: &str, user: &str) -> BusMessage {
        let body = json!({
            "text": text,
            "sessionId": session,
            "chatMessageId": chat_id,
            "userId": user,
        });
        BusMessage::new(body.to_string(), session).with_message_id(chat_id)
    }

    async fn drain_events(rx: &mut Box<dyn SubscriptionReceiver>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Some(delivery) = rx.receive(StdDuration::from_millis(50)).await.unwrap() {
            events.push(serde_json::from_str(&delivery.message().body).unwrap());
            delivery.complete().await.unwrap();
        }
        events
    }

    fn cached_conversation(cache: &MemoryCache, session: &str) -> Conversation {
        serde_json::from_str(&cache.raw(session).expect("conversation cached")).unwrap()
    }

    #[tokio::test]
    async fn first_turn_streams_persists_and_announces() {
        let f = fixture().await;
        let mut tokens = f.bus.subscription_receiver("token-streams", "sse").await.unwrap();
        let mut completed = f
            .bus
            .subscription_receiver("message-completed", "history")
            .await
            .unwrap();

        f.chat.push_text_stream(&["Hel", "lo!"]);
        f.worker
            .process(&request_message("Hello", "s1", "m1", "u1"))
            .await
            .unwrap();

        // token events preserve chunk boundaries and end with the sentinel
        let events = drain_events(&mut tokens).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["token"], "Hel");
        assert_eq!(events[1]["token"], "lo!");
        assert_eq!(events[2]["end_of_stream"], true);
        assert_eq!(events[0]["chatMessageId"], "m1");

        // cache holds [system, user, assistant]
        let conversation = cached_conversation(&f.cache, "s1");
        assert_eq!(conversation.user_id, "u1");
        assert!(conversation.title.is_none());
        let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(conversation.messages[1].content, "Hello");
        assert_eq!(conversation.messages[2].content, "Hello!");
        assert_eq!(conversation.messages[2].message_id, "m1_assistant");

        // one completion event with the request's chat message id
        let completions = drain_events(&mut completed).await;
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0]["chatMessageId"], "m1");
        assert_eq!(completions[0]["eventType"], "message_completed");

        // new session fetched the memory profile exactly once
        assert_eq!(f.memory.fetches(), 1);
    }

    #[tokio::test]
    async fn second_turn_reuses_pinned_system_prompt() {
        let f = fixture().await;
        f.chat.push_text_stream(&["First."]);
        f.chat.push_text_stream(&["Second."]);

        f.worker
            .process(&request_message("Hello", "s1", "m1", "u1"))
            .await
            .unwrap();
        f.worker
            .process(&request_message("And then?", "s1", "m2", "u1"))
            .await
            .unwrap();

        let conversation = cached_conversation(&f.cache, "s1");
        assert_eq!(conversation.messages.len(), 5);
        let system_count = conversation
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        assert_eq!(system_count, 1);
        // profile fetch happens only while there is no pinned system head
        assert_eq!(f.memory.fetches(), 1);

        // the second LLM call saw the stored history plus the new turn,
        // with no second system message
        let requests = f.chat.requests();
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn tool_round_invokes_search_and_streams_followup() {
        let f = fixture().await;
        let mut tokens = f.bus.subscription_receiver("token-streams", "sse").await.unwrap();

        // Tool call split across seven deltas, id arriving on the fourth.
        f.chat.push_stream(vec![
            StreamEvent::ToolCallDelta { index: 0, id: None, name: Some("search_conversation_history".into()), arguments: None },
            StreamEvent::ToolCallDelta { index: 0, id: None, name: None, arguments: Some("{\"sea".into()) },
            StreamEvent::ToolCallDelta { index: 0, id: None, name: None, arguments: Some("rch_query\": \"vac".into()) },
            StreamEvent::ToolCallDelta { index: 0, id: Some("call_7".into()), name: None, arguments: Some("ation\"".into()) },
            StreamEvent::ToolCallDelta { index: 0, id: None, name: None, arguments: Some(", \"li".into()) },
            StreamEvent::ToolCallDelta { index: 0, id: None, name: None, arguments: Some("mit\": ".into()) },
            StreamEvent::ToolCallDelta { index: 0, id: None, name: None, arguments: Some("3}".into()) },
            StreamEvent::Done { finish_reason: "tool_calls".into() },
        ]);
        f.chat.push_text_stream(&["You said you wanted to visit Kyoto."]);

        f.worker
            .process(&request_message("Where did I want to go?", "s1", "m1", "u1"))
            .await
            .unwrap();

        // the memory API saw exactly one reassembled call
        assert_eq!(f.memory.searches(), vec![("u1".to_string(), "vacation".to_string(), 3)]);

        // follow-up request carried the assistant tool_calls and tool result
        let requests = f.chat.requests();
        assert_eq!(requests.len(), 2);
        let followup = &requests[1];
        let assistant = followup
            .messages
            .iter()
            .find(|m| m.tool_calls.is_some())
            .expect("assistant tool_calls message");
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_7");
        assert_eq!(calls[0].function.name, "search_conversation_history");
        let tool = followup
            .messages
            .iter()
            .find(|m| m.tool_call_id.is_some())
            .expect("tool result message");
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_7"));

        // final assistant text is the follow-up stream, persisted and sent
        let conversation = cached_conversation(&f.cache, "s1");
        assert_eq!(
            conversation.messages.last().unwrap().content,
            "You said you wanted to visit Kyoto."
        );
        let events = drain_events(&mut tokens).await;
        assert_eq!(events.last().unwrap()["end_of_stream"], true);
    }

    #[tokio::test]
    async fn bad_tool_arguments_become_error_tool_message() {
        let f = fixture().await;
        f.chat.push_stream(vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("search_conversation_history".into()),
                arguments: Some("{not valid".into()),
            },
            StreamEvent::Done { finish_reason: "tool_calls".into() },
        ]);
        f.chat.push_text_stream(&["Sorry, I could not search."]);

        f.worker
            .process(&request_message("look it up", "s1", "m1", "u1"))
            .await
            .unwrap();

        // search never ran; the model received an error-shaped tool message
        assert!(f.memory.searches().is_empty());
        let followup = &f.chat.requests()[1];
        let tool = followup.messages.iter().find(|m| m.tool_call_id.is_some()).unwrap();
        assert!(tool.content.as_ref().unwrap().contains("Invalid function arguments"));
    }

    #[tokio::test]
    async fn memory_profile_is_rendered_into_system_prompt() {
        let f = fixture().await;
        f.memory.set_profile(json!({"interests": ["sailing"]}));
        f.chat.push_text_stream(&["ahoy"]);

        f.worker
            .process(&request_message("hi", "s1", "m1", "u1"))
            .await
            .unwrap();

        let first_request = &f.chat.requests()[0];
        let system = first_request.messages.first().unwrap();
        assert_eq!(system.role, Role::System);
        assert!(system.content.as_ref().unwrap().contains("sailing"));
    }

    #[tokio::test]
    async fn cached_session_of_another_user_is_invisible() {
        let f = fixture().await;

        // Seed the session with a conversation owned by u2.
        let now = Utc::now();
        let mut foreign = Conversation::new("s1", "u2", now);
        foreign.push_message("old", "system", Role::System, "other user's prompt", now);
        foreign.push_message("old", "user", Role::User, "u2 secret", now);
        f.cache
            .put(&foreign, Duration::from_secs(60))
            .await
            .unwrap();

        f.chat.push_text_stream(&["fresh start"]);
        f.worker
            .process(&request_message("hi", "s1", "m1", "u1"))
            .await
            .unwrap();

        // the LLM saw a brand new session: its own system prompt + the turn
        let request = &f.chat.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert!(!request
            .messages
            .iter()
            .any(|m| m.content.as_deref() == Some("u2 secret")));

        // and the persisted state now belongs to the requesting user
        let conversation = cached_conversation(&f.cache, "s1");
        assert_eq!(conversation.user_id, "u1");
    }

    #[tokio::test]
    async fn malformed_request_is_consumed_with_courtesy_eos() {
        let f = fixture().await;
        let mut tokens = f.bus.subscription_receiver("token-streams", "sse").await.unwrap();

        let message = BusMessage::new("{\"sessionId\": \"s1\"}", "s1").with_message_id("bad-1");
        f.worker.process(&message).await.unwrap();

        let events = drain_events(&mut tokens).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["end_of_stream"], true);
        assert!(f.cache.raw("s1").is_none());
        assert!(f.chat.requests().is_empty());
    }

    #[tokio::test]
    async fn llm_failure_is_retryable_and_leaves_no_state() {
        let f = fixture().await;
        let mut completed = f
            .bus
            .subscription_receiver("message-completed", "history")
            .await
            .unwrap();

        f.chat.fail_next(1);
        let result = f
            .worker
            .process(&request_message("hi", "s1", "m1", "u1"))
            .await;
        assert!(result.is_err());
        assert!(f.cache.raw("s1").is_none());
        assert!(drain_events(&mut completed).await.is_empty());

        // retry with a healthy backend converges to the single-run state
        f.chat.push_text_stream(&["recovered"]);
        f.worker
            .process(&request_message("hi", "s1", "m1", "u1"))
            .await
            .unwrap();
        let conversation = cached_conversation(&f.cache, "s1");
        assert_eq!(conversation.messages.last().unwrap().content, "recovered");
        assert_eq!(drain_events(&mut completed).await.len(), 1);
    }

    /// Delegates reads, refuses writes. Exercises the persist-is-best-effort path.
    struct ReadOnlyCache(Arc<MemoryCache>);

    #[async_trait]
    impl SessionCache for ReadOnlyCache {
        async fn get(&self, session_id: &str) -> Result<Option<Conversation>, fathom_cache::CacheError> {
            self.0.get(session_id).await
        }

        async fn put(&self, _conversation: &Conversation, _ttl: Duration) -> Result<(), fathom_cache::CacheError> {
            Err(fathom_cache::CacheError::Connection("write refused".to_string()))
        }
    }

    #[tokio::test]
    async fn cache_write_failure_does_not_fail_the_turn() {
        let bus = MemoryBus::new();
        let inner = Arc::new(MemoryCache::new());
        let chat = Arc::new(ScriptedChat::new());
        let memory = Arc::new(StubMemoryApi::default());
        let tokens = Arc::new(SenderPool::new(vec![bus
            .topic_sender("token-streams")
            .await
            .unwrap()]));
        let completions = bus.topic_sender("message-completed").await.unwrap();
        let worker = LlmWorker::new(
            Arc::new(ReadOnlyCache(inner.clone())),
            chat.clone(),
            memory,
            tokens,
            completions,
            3,
            false,
        );
        let mut completed = bus
            .subscription_receiver("message-completed", "history")
            .await
            .unwrap();

        chat.push_text_stream(&["ok"]);
        worker
            .process(&request_message("hi", "s1", "m1", "u1"))
            .await
            .unwrap();

        // turn succeeded and announced completion even though nothing persisted
        assert!(inner.raw("s1").is_none());
        assert_eq!(drain_events(&mut completed).await.len(), 1);
    }

    #[tokio::test]
    async fn cache_read_failure_is_retryable() {
        let f = fixture().await;
        f.cache.fail_next(1);
        let result = f
            .worker
            .process(&request_message("hi", "s1", "m1", "u1"))
            .await;
        assert!(result.is_err());
        assert!(f.chat.requests().is_empty());
    }
}
