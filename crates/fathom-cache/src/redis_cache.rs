use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use fathom_core::config::CacheConfig;
use fathom_core::types::Conversation;

use crate::error::CacheError;
use crate::{session_key, SessionCache};

/// Redis-protocol session cache over a multiplexed connection manager.
/// The manager reconnects internally, so one client is shared by all
/// in-flight tasks.
pub struct RedisSessionCache {
    manager: ConnectionManager,
}

impl RedisSessionCache {
    /// Connect and ping so a bad endpoint fails startup, not the first turn.
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let scheme = if config.tls { "rediss" } else { "redis" };
        let url = format!("{}://{}:{}", scheme, config.host, config.port);
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let _: () = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn get(&self, session_id: &str) -> Result<Option<Conversation>, CacheError> {
        let key = session_key(session_id);
        let mut con = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut con).await?;
        match value {
            None => Ok(None),
            Some(raw) => {
                let conversation =
                    serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
                        key,
                        reason: e.to_string(),
                    })?;
                Ok(Some(conversation))
            }
        }
    }

    async fn put(&self, conversation: &Conversation, ttl: Duration) -> Result<(), CacheError> {
        let key = session_key(&conversation.session_id);
        let raw = serde_json::to_string(conversation).map_err(|e| CacheError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let mut con = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(&raw)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut con)
            .await?;
        debug!(key, messages = conversation.messages.len(), "session cached");
        Ok(())
    }
}
