use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use fathom_core::config::MemoryApiConfig;

/// Read-side memory API used twice per turn at most: the user profile for
/// new-session system prompts, and the conversation-search tool.
///
/// Both calls are deliberately infallible: every failure mode degrades to
/// a well-formed value (empty profile, or a result object carrying a
/// `message`), because memory is an enrichment, never a prerequisite.
#[async_trait]
pub trait MemoryApi: Send + Sync {
    async fn fetch_user_memory(&self, user_id: &str) -> Value;

    async fn search_conversations(&self, user_id: &str, query: &str, limit: i64) -> Value;
}

pub struct HttpMemoryApi {
    client: reqwest::Client,
    endpoint: String,
    /// Per-call bound so one slow memory lookup cannot stall a turn.
    timeout: Duration,
}

impl HttpMemoryApi {
    pub fn new(config: &MemoryApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs_f64(config.timeout_secs),
        }
    }
}

#[async_trait]
impl MemoryApi for HttpMemoryApi {
    async fn fetch_user_memory(&self, user_id: &str) -> Value {
        if self.endpoint.is_empty() {
            debug!("memory API not configured, skipping profile fetch");
            return json!({});
        }
        let url = format!("{}/api/memory/users/{}/memories", self.endpoint, user_id);
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(memory) => {
                    info!(user_id, "fetched user memory");
                    memory
                }
                Err(e) => {
                    warn!(user_id, error = %e, "memory API returned unparseable profile");
                    json!({})
                }
            },
            Ok(resp) if resp.status().as_u16() == 404 => {
                info!(user_id, "no memory profile yet");
                json!({})
            }
            Ok(resp) => {
                warn!(user_id, status = resp.status().as_u16(), "memory API error fetching profile");
                json!({})
            }
            Err(e) if e.is_timeout() => {
                warn!(user_id, "memory API timed out fetching profile");
                json!({})
            }
            Err(e) => {
                warn!(user_id, error = %e, "memory API unreachable");
                json!({})
            }
        }
    }

    async fn search_conversations(&self, user_id: &str, query: &str, limit: i64) -> Value {
        if self.endpoint.is_empty() {
            return json!({"conversations": [], "message": "Memory API not available"});
        }
        let query = query.trim();
        if query.is_empty() {
            warn!(user_id, "empty search query passed to conversation search");
            return json!({"conversations": [], "message": "Empty search query provided"});
        }
        let limit = limit.clamp(1, 10);

        let url = format!(
            "{}/api/memory/users/{}/conversations/search",
            self.endpoint, user_id
        );
        let body = json!({ "query": query, "limit": limit });

        match self.client.post(&url).timeout(self.timeout).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Vec<Value>>().await {
                Ok(conversations) => {
                    info!(user_id, found = conversations.len(), "conversation search succeeded");
                    format_search_results(query, conversations)
                }
                Err(e) => {
                    warn!(user_id, error = %e, "conversation search returned unparseable body");
                    json!({"conversations": [], "message": format!("Search error: {e}")})
                }
            },
            Ok(resp) if resp.status().as_u16() == 404 => {
                info!(user_id, "no previous conversations");
                json!({"conversations": [], "message": "No previous conversations found"})
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                warn!(user_id, status, "conversation search failed");
                json!({"conversations": [], "message": format!("Search failed with status {status}")})
            }
            Err(e) if e.is_timeout() => {
                warn!(user_id, "conversation search timed out");
                json!({"conversations": [], "message": "Search timeout"})
            }
            Err(e) => {
                warn!(user_id, error = %e, "conversation search transport error");
                json!({"conversations": [], "message": format!("Search error: {e}")})
            }
        }
    }
}

/// Shape raw search hits into the tool contract the model was promised.
pub fn format_search_results(query: &str, conversations: Vec<Value>) -> Value {
    let total = conversations.len();
    let formatted: Vec<Value> = conversations
        .into_iter()
        .map(|conv| {
            json!({
                "summary": conv.get("summary").cloned().unwrap_or(Value::Null),
                "themes": conv.get("themes").cloned().unwrap_or_else(|| json!([])),
                "timestamp": conv.get("timestamp").cloned().unwrap_or(Value::Null),
                "relevance_score": conv.get("relevance_score").cloned().unwrap_or_else(|| json!(0.0)),
                "user_sentiment": conv.get("user_sentiment").cloned().unwrap_or_else(|| json!("neutral")),
                "persons_mentioned": conv.get("persons").cloned().unwrap_or_else(|| json!([])),
                "places_mentioned": conv.get("places").cloned().unwrap_or_else(|| json!([])),
            })
        })
        .collect();
    json!({
        "conversations": formatted,
        "total_found": total,
        "search_query": query,
    })
}
