use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Cache entries expire 24 hours after the last write.
pub const SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Top-level config (fathom.toml + FATHOM_* env overrides).
///
/// Deployments that configure purely through the environment set
/// `FATHOM_<SECTION>__<FIELD>` variables; the TOML file is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FathomConfig {
    pub bus: BusConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory_api: MemoryApiConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Bus namespace plus the topic/subscription names the workers bind to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub namespace: String,
    #[serde(default = "default_user_messages_topic")]
    pub user_messages_topic: String,
    #[serde(default = "default_user_messages_subscription")]
    pub user_messages_subscription: String,
    #[serde(default = "default_token_streams_topic")]
    pub token_streams_topic: String,
    #[serde(default = "default_message_completed_topic")]
    pub message_completed_topic: String,
    /// Subscription name for this worker on the message-completed topic.
    /// Empty means the binary's own default ("history" / "memory"), so the
    /// completion event fans out to both workers independently.
    #[serde(default)]
    pub message_completed_subscription: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub host: String,
    #[serde(default = "default_cache_port")]
    pub port: u16,
    #[serde(default = "bool_true")]
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    /// Base64-encoded account master key.
    pub key: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_history_container")]
    pub history_container: String,
    #[serde(default = "default_conversations_container")]
    pub conversations_container: String,
    #[serde(default = "default_user_memories_container")]
    pub user_memories_container: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub chat_deployment: String,
    #[serde(default)]
    pub embeddings_deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

/// Memory read API reached by the LLM worker for system prompts and the
/// conversation-search tool. Disabled when the endpoint is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryApiConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_memory_timeout_secs")]
    pub timeout_secs: f64,
}

impl Default for MemoryApiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: default_memory_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Seconds to wait for in-flight turns on shutdown. Unset means each
    /// binary's own default: 240 for the LLM worker (turns stream for a
    /// while), 60 for the history and memory workers.
    #[serde(default)]
    pub drain_timeout_secs: Option<u64>,
    /// Upper bound on LLM → tool → LLM rounds within one turn.
    #[serde(default = "default_tool_loop_max_rounds")]
    pub tool_loop_max_rounds: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            drain_timeout_secs: None,
            tool_loop_max_rounds: default_tool_loop_max_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When true, fetched memory payloads and rendered prompts are logged
    /// at debug level. Off by default: memory content is user data.
    #[serde(default)]
    pub record_memory_content: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            record_memory_content: false,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_user_messages_topic() -> String {
    "user-messages".to_string()
}
fn default_user_messages_subscription() -> String {
    "user-messages-sub".to_string()
}
fn default_token_streams_topic() -> String {
    "token-streams".to_string()
}
fn default_message_completed_topic() -> String {
    "message-completed".to_string()
}
fn default_cache_port() -> u16 {
    6380
}
fn default_database() -> String {
    "fathom".to_string()
}
fn default_history_container() -> String {
    "history".to_string()
}
fn default_conversations_container() -> String {
    "conversations".to_string()
}
fn default_user_memories_container() -> String {
    "user-memories".to_string()
}
fn default_api_version() -> String {
    "2025-04-01-preview".to_string()
}
fn default_memory_timeout_secs() -> f64 {
    2.0
}
fn default_max_concurrency() -> usize {
    10
}
fn default_tool_loop_max_rounds() -> u32 {
    3
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl FathomConfig {
    /// Load config from a TOML file with FATHOM_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. FATHOM_CONFIG env var
    ///   3. ./fathom.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("FATHOM_CONFIG").ok())
            .unwrap_or_else(|| "fathom.toml".to_string());

        let config: FathomConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("FATHOM_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults() {
        let w = WorkerConfig::default();
        assert_eq!(w.max_concurrency, 10);
        assert!(w.drain_timeout_secs.is_none());
        assert_eq!(w.tool_loop_max_rounds, 3);
    }

    #[test]
    fn memory_api_disabled_by_default() {
        let m = MemoryApiConfig::default();
        assert!(m.endpoint.is_empty());
        assert_eq!(m.timeout_secs, 2.0);
    }
}
