//! Session cache contract and bindings.
//!
//! One conversation per session under `session:{sessionId}`, rewritten in
//! full on every update with the TTL reset to 24 hours. The Redis binding
//! is the production path; `MemoryCache` backs the test suite.

use std::time::Duration;

use async_trait::async_trait;

use fathom_core::types::Conversation;

pub mod error;
pub mod memory;
pub mod redis_cache;

pub use error::CacheError;
pub use memory::MemoryCache;
pub use redis_cache::RedisSessionCache;

pub const SESSION_KEY_PREFIX: &str = "session:";

pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

/// Conversation state cache. Implementations must be safe for concurrent
/// use by many in-flight message tasks.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Fetch the conversation for a session, `None` when absent or expired.
    async fn get(&self, session_id: &str) -> Result<Option<Conversation>, CacheError>;

    /// Write the full conversation value and reset its TTL.
    async fn put(&self, conversation: &Conversation, ttl: Duration) -> Result<(), CacheError>;
}
