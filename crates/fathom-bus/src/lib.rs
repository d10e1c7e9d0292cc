//! Bus contract for the fathom pipeline.
//!
//! The workers depend on three capabilities only: publishing to a topic,
//! receiving from a competing-consumer subscription with per-session FIFO,
//! and settling each delivery exactly once (`complete` / `abandon`).
//! `memory::MemoryBus` implements the contract in-process for tests and
//! single-host deployments; a product binding implements the same traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod error;
pub mod memory;
pub mod sender;
pub mod types;

pub use error::BusError;
pub use sender::SenderPool;
pub use types::BusMessage;

/// Resolve a namespace to a bus client. This is the binaries' composition
/// point: `mem://{name}` namespaces map onto the in-process broker; any
/// other scheme must be wired to a product binding by the deployment.
pub fn connect(namespace: &str) -> Result<Arc<dyn BusClient>, BusError> {
    if let Some(name) = namespace.strip_prefix("mem://") {
        return Ok(Arc::new(memory::shared(name)));
    }
    Err(BusError::Disconnected(format!(
        "no bus binding for namespace '{namespace}' (expected mem://<name>)"
    )))
}

/// Publishes messages to one topic. Safe for concurrent use.
#[async_trait]
pub trait TopicSender: Send + Sync {
    async fn send(&self, message: BusMessage) -> Result<(), BusError>;
}

/// A delivered message plus its settlement handle.
///
/// Settlement consumes the delivery so a message cannot be settled twice.
/// A delivery that is dropped unsettled is redelivered once its lock
/// expires, exactly as if the holding process had crashed.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &BusMessage;

    /// 1 on first delivery, incremented on each redelivery.
    fn delivery_count(&self) -> u32;

    async fn complete(self: Box<Self>) -> Result<(), BusError>;

    async fn abandon(self: Box<Self>) -> Result<(), BusError>;
}

/// Competing-consumer receiver over one subscription.
///
/// Messages sharing a `session_id` are handed out in publish order with at
/// most one in flight across all receivers of the subscription; parallelism
/// is across sessions only.
#[async_trait]
pub trait SubscriptionReceiver: Send {
    /// Wait up to `max_wait` for the next delivery. `Ok(None)` means the
    /// wait elapsed with nothing available — not an error.
    async fn receive(&mut self, max_wait: Duration) -> Result<Option<Box<dyn Delivery>>, BusError>;
}

/// Connection handle to a bus namespace.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn topic_sender(&self, topic: &str) -> Result<Arc<dyn TopicSender>, BusError>;

    async fn subscription_receiver(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Box<dyn SubscriptionReceiver>, BusError>;
}
