use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::StoreError;
use crate::DocumentStore;

/// In-memory store binding for tests. Documents live in a map keyed by
/// (container, partition, id); failure scripting covers the throttling
/// and transport paths the workers must survive.
#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<(String, String, String), Value>,
    throttle_next: Mutex<u32>,
    fail_next: Mutex<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `n` operations with a throttling error.
    pub fn throttle_next(&self, n: u32) {
        *self.throttle_next.lock().unwrap() = n;
    }

    /// Answer the next `n` operations with a transport error.
    pub fn fail_next(&self, n: u32) {
        *self.fail_next.lock().unwrap() = n;
    }

    fn scripted_failure(&self) -> Option<StoreError> {
        {
            let mut throttle = self.throttle_next.lock().unwrap();
            if *throttle > 0 {
                *throttle -= 1;
                return Some(StoreError::Throttled {
                    retry_after: Duration::from_millis(10),
                });
            }
        }
        let mut fail = self.fail_next.lock().unwrap();
        if *fail > 0 {
            *fail -= 1;
            return Some(StoreError::Transport("injected failure".to_string()));
        }
        None
    }

    /// Test inspection: a stored document, bypassing failure scripting.
    pub fn document(&self, container: &str, partition_key: &str, id: &str) -> Option<Value> {
        self.documents
            .get(&(container.to_string(), partition_key.to_string(), id.to_string()))
            .map(|v| v.clone())
    }

    pub fn len(&self, container: &str) -> usize {
        self.documents.iter().filter(|e| e.key().0 == container).count()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(
        &self,
        container: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Value>, StoreError> {
        if let Some(err) = self.scripted_failure() {
            return Err(err);
        }
        Ok(self.document(container, partition_key, id))
    }

    async fn upsert(
        &self,
        container: &str,
        partition_key: &str,
        document: &Value,
    ) -> Result<(), StoreError> {
        if let Some(err) = self.scripted_failure() {
            return Err(err);
        }
        let id = document
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Api {
                status: 400,
                message: "document missing 'id'".to_string(),
            })?
            .to_string();
        self.documents.insert(
            (container.to_string(), partition_key.to_string(), id),
            document.clone(),
        );
        Ok(())
    }
}
