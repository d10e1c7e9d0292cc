use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn, Instrument};

use fathom_bus::BusMessage;
use fathom_cache::SessionCache;
use fathom_core::telemetry::message_span;
use fathom_core::types::{CompletionEvent, HistoryDocument};
use fathom_llm::ChatApi;
use fathom_runtime::MessageProcessor;
use fathom_store::{DocumentStore, StoreError};

use crate::title;

/// Throttled upserts retry locally before the message goes back to the bus.
const MAX_UPSERT_ATTEMPTS: u32 = 3;
const THROTTLE_BACKOFF_STEP: Duration = Duration::from_secs(2);

/// Persists the final conversation state for long-term retrieval, assigning
/// a title on first persistence.
pub struct HistoryWorker {
    cache: Arc<dyn SessionCache>,
    chat: Arc<dyn ChatApi>,
    store: Arc<dyn DocumentStore>,
    container: String,
}

impl HistoryWorker {
    pub fn new(
        cache: Arc<dyn SessionCache>,
        chat: Arc<dyn ChatApi>,
        store: Arc<dyn DocumentStore>,
        container: String,
    ) -> Self {
        Self {
            cache,
            chat,
            store,
            container,
        }
    }

    async fn persist(&self, event: &CompletionEvent) -> anyhow::Result<()> {
        let conversation = self
            .cache
            .get(&event.session_id)
            .await
            .context("read conversation from cache")?
            .with_context(|| {
                format!(
                    "conversation for session {} not in cache yet",
                    event.session_id
                )
            })?;

        if conversation.user_id.is_empty() {
            // Without the owning user the document cannot be partitioned;
            // leave the message to redelivery.
            anyhow::bail!("cached conversation has no userId");
        }

        let title = match &conversation.title {
            Some(existing) if !existing.is_empty() => existing.clone(),
            _ => title::generate_title(self.chat.as_ref(), &conversation).await,
        };

        let document = HistoryDocument::from_conversation(&conversation, Some(title), Utc::now());
        let body = serde_json::to_value(&document).context("encode history document")?;

        self.upsert_with_throttle_retry(&document.session_id, &body)
            .await?;
        info!(
            messages = document.messages.len(),
            title = document.title.as_deref().unwrap_or_default(),
            "conversation persisted to history store"
        );
        Ok(())
    }

    /// Upsert with bounded linear backoff on throttling (2s, 4s). A still-
    /// throttled third attempt and every other store error go back to the
    /// bus as a retryable failure.
    async fn upsert_with_throttle_retry(
        &self,
        partition_key: &str,
        document: &serde_json::Value,
    ) -> anyhow::Result<()> {
        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            match self.store.upsert(&self.container, partition_key, document).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Throttled { retry_after }) if attempt < MAX_UPSERT_ATTEMPTS => {
                    let backoff = THROTTLE_BACKOFF_STEP * attempt;
                    warn!(
                        attempt,
                        server_hint_ms = retry_after.as_millis() as u64,
                        backoff_secs = backoff.as_secs(),
                        "history upsert throttled, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e).context("upsert history document"),
            }
        }
        unreachable!("loop returns on success or error")
    }
}

#[async_trait]
impl MessageProcessor for HistoryWorker {
    async fn process(&self, message: &BusMessage) -> anyhow::Result<()> {
        let event: CompletionEvent = match serde_json::from_str(&message.body) {
            Ok(event) => event,
            Err(e) => {
                // Malformed events are terminal: consumed without side effects.
                error!(message_id = %message.message_id, error = %e, "malformed completion event");
                return Ok(());
            }
        };
        if event.session_id.is_empty() {
            error!(message_id = %message.message_id, "completion event missing sessionId");
            return Ok(());
        }

        let span = message_span(
            "history-worker",
            &event.session_id,
            &event.user_id,
            &event.chat_message_id,
            &message.message_id,
        );
        self.persist(&event).instrument(span).await
    }

    fn name(&self) -> &'static str {
        "history-worker"
    }
}
