use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::BusError;
use crate::types::BusMessage;
use crate::TopicSender;

/// Fixed pool of long-lived topic senders.
///
/// Each sender is guarded by its own mutex so only one send is in flight
/// per sender; concurrent tasks spread across the pool round-robin instead
/// of serializing on a single link.
pub struct SenderPool {
    slots: Vec<Mutex<Arc<dyn TopicSender>>>,
    next: AtomicUsize,
}

impl SenderPool {
    pub fn new(senders: Vec<Arc<dyn TopicSender>>) -> Self {
        Self {
            slots: senders.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub async fn send(&self, message: BusMessage) -> Result<(), BusError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let sender = self.slots[idx].lock().await;
        sender.send(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingSender(AtomicU32);

    #[async_trait]
    impl TopicSender for CountingSender {
        async fn send(&self, _message: BusMessage) -> Result<(), BusError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sends_round_robin_across_slots() {
        let a = Arc::new(CountingSender(AtomicU32::new(0)));
        let b = Arc::new(CountingSender(AtomicU32::new(0)));
        let pool = SenderPool::new(vec![a.clone(), b.clone()]);

        for i in 0..6 {
            pool.send(BusMessage::new(format!("{{\"n\":{i}}}"), "s1"))
                .await
                .unwrap();
        }

        assert_eq!(a.0.load(Ordering::SeqCst), 3);
        assert_eq!(b.0.load(Ordering::SeqCst), 3);
    }
}
