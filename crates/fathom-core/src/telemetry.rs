use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. Filter precedence: RUST_LOG, then the
/// config level applied to this worker's crates, then the passed default.
pub fn init(config_level: &str, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_level))
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Correlation span for one bus message. Entered for the lifetime of the
/// processing task so every log line and client call carries the keys.
pub fn message_span(worker: &'static str, session_id: &str, user_id: &str, chat_message_id: &str, bus_message_id: &str) -> Span {
    tracing::info_span!(
        "process_message",
        app = worker,
        session_id = %session_id,
        user_id = %user_id,
        chat_message_id = %chat_message_id,
        bus_message_id = %bus_message_id,
    )
}
