use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn, Instrument};

use fathom_bus::BusMessage;
use fathom_cache::SessionCache;
use fathom_core::telemetry::message_span;
use fathom_core::types::{
    CompletionEvent, ConversationMemoryDocument, UserMemoryDocument,
};
use fathom_llm::{ChatApi, EmbeddingsApi};
use fathom_runtime::MessageProcessor;
use fathom_store::DocumentStore;

use crate::extract;

/// Derives and persists the two memory artifacts of a completed turn: the
/// per-conversation summary document (with embedding) and the consolidated
/// per-user profile.
pub struct MemoryWorker {
    cache: Arc<dyn SessionCache>,
    chat: Arc<dyn ChatApi>,
    embeddings: Arc<dyn EmbeddingsApi>,
    store: Arc<dyn DocumentStore>,
    conversations_container: String,
    user_memories_container: String,
    record_memory_content: bool,
}

impl MemoryWorker {
    pub fn new(
        cache: Arc<dyn SessionCache>,
        chat: Arc<dyn ChatApi>,
        embeddings: Arc<dyn EmbeddingsApi>,
        store: Arc<dyn DocumentStore>,
        conversations_container: String,
        user_memories_container: String,
        record_memory_content: bool,
    ) -> Self {
        Self {
            cache,
            chat,
            embeddings,
            store,
            conversations_container,
            user_memories_container,
            record_memory_content,
        }
    }

    async fn extract_and_store(&self, event: &CompletionEvent) -> anyhow::Result<()> {
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

        // Conversation-level memory: summary + embedding, upserted under a
        // deterministic id so redeliveries converge.
        let analysis = extract::extract_summary(self.chat.as_ref(), &conversation)
            .await
            .context("summarize conversation")?;
        if self.record_memory_content {
            debug!(summary = %analysis.summary, "conversation analysis");
        }

        let vector_embedding = match self
            .embeddings
            .embed(&[extract::embedding_text(&analysis)])
            .await
        {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => Vec::new(),
            Err(e) => {
                // Stored without a vector; semantic search skips it.
                warn!(error = %e, "embedding failed, storing without vector");
                Vec::new()
            }
        };

        let memory_document = ConversationMemoryDocument {
            id: ConversationMemoryDocument::document_id(&event.session_id, &event.user_id),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            summary: analysis.summary.clone(),
            timestamp: Utc::now(),
            themes: analysis.themes.clone(),
            persons: analysis.persons.clone(),
            places: analysis.places.clone(),
            user_sentiment: analysis.user_sentiment,
            vector_embedding,
        };
        self.store
            .upsert(
                &self.conversations_container,
                &event.user_id,
                &serde_json::to_value(&memory_document).context("encode conversation memory")?,
            )
            .await
            .context("upsert conversation memory")?;
        info!("conversation memory stored");

        // User-level memory: read-extract-replace on the consolidated profile.
        let mut profile = match self
            .store
            .read(&self.user_memories_container, &event.user_id, &event.user_id)
            .await
            .context("read user memory")?
        {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "stored user memory unreadable, starting fresh");
                UserMemoryDocument::empty(&event.user_id, Utc::now())
            }),
            None => UserMemoryDocument::empty(&event.user_id, Utc::now()),
        };

        let updates =
            extract::extract_user_memory_updates(self.chat.as_ref(), &conversation, &profile)
                .await
                .context("extract user memory updates")?;

        let Some(updates) = updates else {
            info!("no user memory updates for this turn");
            return Ok(());
        };
        let changed = extract::apply_updates(&mut profile, &updates);
        if changed.is_empty() {
            info!("extractor returned no populated categories");
            return Ok(());
        }

        profile.timestamp = Utc::now();
        self.store
            .upsert(
                &self.user_memories_container,
                &event.user_id,
                &serde_json::to_value(&profile).context("encode user memory")?,
            )
            .await
            .context("upsert user memory")?;
        info!(categories = ?changed, "user memory updated");
        Ok(())
    }
}

#[async_trait]
impl MessageProcessor for MemoryWorker {
    async fn process(&self, message: &BusMessage) -> anyhow::Result<()> {
        let event: CompletionEvent = match serde_json::from_str(&message.body) {
            Ok(event) => event,
            Err(e) => {
                error!(message_id = %message.message_id, error = %e, "malformed completion event");
                return Ok(());
            }
        };
        if event.session_id.is_empty() || event.user_id.is_empty() {
            // Without both ids neither artifact can be addressed; terminal.
            error!(message_id = %message.message_id, "completion event missing sessionId or userId");
            return Ok(());
        }

        let span = message_span(
            "memory-worker",
            &event.session_id,
            &event.user_id,
            &event.chat_message_id,
            &message.message_id,
        );
        self.extract_and_store(&event).instrument(span).await
    }

    fn name(&self) -> &'static str {
        "memory-worker"
    }
}
