use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use fathom_core::types::Conversation;

use crate::error::CacheError;
use crate::{session_key, SessionCache};

/// In-memory cache binding with real TTL behavior, for tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    /// When set, the next `fail_next` operations return a connection error.
    fail_next: Mutex<u32>,
}

struct Entry {
    raw: String,
    expires_at: Instant,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail, to exercise retry paths.
    pub fn fail_next(&self, n: u32) {
        *self.fail_next.lock().unwrap() = n;
    }

    fn take_failure(&self) -> bool {
        let mut left = self.fail_next.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }

    /// Raw JSON stored for a session, ignoring TTL. Test inspection only.
    pub fn raw(&self, session_id: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(&session_key(session_id))
            .map(|e| e.raw.clone())
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn get(&self, session_id: &str) -> Result<Option<Conversation>, CacheError> {
        if self.take_failure() {
            return Err(CacheError::Connection("injected failure".to_string()));
        }
        let key = session_key(session_id);
        let entries = self.entries.lock().unwrap();
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let conversation =
                    serde_json::from_str(&entry.raw).map_err(|e| CacheError::Corrupt {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(conversation))
            }
            _ => Ok(None),
        }
    }

    async fn put(&self, conversation: &Conversation, ttl: Duration) -> Result<(), CacheError> {
        if self.take_failure() {
            return Err(CacheError::Connection("injected failure".to_string()));
        }
        let key = session_key(&conversation.session_id);
        let raw = serde_json::to_string(conversation).map_err(|e| CacheError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.entries.lock().unwrap().insert(
            key,
            Entry {
                raw,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}
