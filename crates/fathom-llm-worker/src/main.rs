use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use fathom_bus::SenderPool;
use fathom_cache::RedisSessionCache;
use fathom_core::config::FathomConfig;
use fathom_llm::{AzureChatClient, ChatApi};
use fathom_runtime::{run_worker, ShellOptions, ShutdownSignal};

mod memory_api;
mod prompt;
mod tools;
mod worker;

use memory_api::{HttpMemoryApi, MemoryApi};
use worker::LlmWorker;

/// Long-lived token senders, each mutex-guarded inside the pool; streaming
/// turns share them round-robin.
const TOKEN_SENDER_POOL_SIZE: usize = 4;
/// Streaming turns can run for minutes, so this worker drains longer than
/// the downstream ones.
const DEFAULT_DRAIN_SECS: u64 = 240;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = FathomConfig::load(None).context("load configuration")?;
    fathom_core::telemetry::init(&config.log.level, "fathom_llm_worker=info");

    info!(
        namespace = %config.bus.namespace,
        topic = %config.bus.user_messages_topic,
        subscription = %config.bus.user_messages_subscription,
        max_concurrency = config.worker.max_concurrency,
        "starting LLM worker"
    );

    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_os_signals();

    // Clients in initialization order; a failure here exits non-zero.
    let cache = Arc::new(
        RedisSessionCache::connect(&config.cache)
            .await
            .context("connect session cache")?,
    );
    let bus = fathom_bus::connect(&config.bus.namespace).context("connect bus")?;

    let mut token_senders = Vec::with_capacity(TOKEN_SENDER_POOL_SIZE);
    for _ in 0..TOKEN_SENDER_POOL_SIZE {
        token_senders.push(
            bus.topic_sender(&config.bus.token_streams_topic)
                .await
                .context("create token stream sender")?,
        );
    }
    let tokens = Arc::new(SenderPool::new(token_senders));
    let completions = bus
        .topic_sender(&config.bus.message_completed_topic)
        .await
        .context("create completion sender")?;

    let chat: Arc<dyn ChatApi> = Arc::new(AzureChatClient::new(&config.llm));
    let memory: Arc<dyn MemoryApi> = Arc::new(HttpMemoryApi::new(&config.memory_api));

    let processor = Arc::new(LlmWorker::new(
        cache,
        chat,
        memory,
        tokens,
        completions,
        config.worker.tool_loop_max_rounds,
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
        &config.bus.user_messages_topic,
        &config.bus.user_messages_subscription,
        processor,
        options,
        shutdown,
    )
    .await;

    info!("LLM worker shutdown complete");
    Ok(())
}
