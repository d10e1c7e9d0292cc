use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use fathom_cache::RedisSessionCache;
use fathom_core::config::FathomConfig;
use fathom_llm::{AzureChatClient, AzureEmbeddingsClient, ChatApi, EmbeddingsApi};
use fathom_runtime::{run_worker, ShellOptions, ShutdownSignal};
use fathom_store::{CosmosStore, DocumentStore};

mod extract;
mod worker;

use worker::MemoryWorker;

const DEFAULT_DRAIN_SECS: u64 = 60;
/// This worker's own fan-out subscription on message-completed.
const DEFAULT_SUBSCRIPTION: &str = "memory";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = FathomConfig::load(None).context("load configuration")?;
    fathom_core::telemetry::init(&config.log.level, "fathom_memory_worker=info");

    let subscription = if config.bus.message_completed_subscription.is_empty() {
        DEFAULT_SUBSCRIPTION.to_string()
    } else {
        config.bus.message_completed_subscription.clone()
    };

    info!(
        namespace = %config.bus.namespace,
        topic = %config.bus.message_completed_topic,
        subscription = %subscription,
        conversations = %config.store.conversations_container,
        user_memories = %config.store.user_memories_container,
        max_concurrency = config.worker.max_concurrency,
        "starting memory worker"
    );

    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_os_signals();

    let cache = Arc::new(
        RedisSessionCache::connect(&config.cache)
            .await
            .context("connect session cache")?,
    );
    let store: Arc<dyn DocumentStore> =
        Arc::new(CosmosStore::new(&config.store).context("build document store client")?);
    let chat: Arc<dyn ChatApi> = Arc::new(AzureChatClient::new(&config.llm));
    let embeddings: Arc<dyn EmbeddingsApi> = Arc::new(AzureEmbeddingsClient::new(&config.llm));
    let bus = fathom_bus::connect(&config.bus.namespace).context("connect bus")?;

    let processor = Arc::new(MemoryWorker::new(
        cache,
        chat,
        embeddings,
        store,
        config.store.conversations_container.clone(),
        config.store.user_memories_container.clone(),
        config.log.record_memory_content,
    ));

    let options = ShellOptions {
        max_concurrency: config.worker.max_concurrency,
        drain_timeout: Duration::from_secs(
            config.worker.drain_timeout_secs.unwrap_or(DEFAULT_DRAIN_SECS),
        ),
        ..Default::default()
    };

    run_worker(
        bus,
        &config.bus.message_completed_topic,
        &subscription,
        processor,
        options,
        shutdown,
    )
    .await;

    info!("memory worker shutdown complete");
    Ok(())
}
