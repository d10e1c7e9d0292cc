//! In-process bus binding.
//!
//! A broker with real session semantics: per-session FIFO, at most one
//! in-flight delivery per session across competing consumers, lock-expiry
//! redelivery and delivery counting. Used by the test suite and by
//! single-host deployments where all workers share one process tree.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::BusError;
use crate::types::BusMessage;
use crate::{BusClient, Delivery, SubscriptionReceiver, TopicSender};

const DEFAULT_LOCK: Duration = Duration::from_secs(30);

/// Process-wide namespace registry: every `shared("ns")` call with the same
/// name returns a handle to the same broker, so all workers composed into
/// one process see one bus.
pub fn shared(namespace: &str) -> MemoryBus {
    use std::sync::OnceLock;
    static NAMESPACES: OnceLock<DashMap<String, MemoryBus>> = OnceLock::new();
    NAMESPACES
        .get_or_init(DashMap::new)
        .entry(namespace.to_string())
        .or_insert_with(MemoryBus::new)
        .clone()
}

/// In-process bus namespace. Cloning shares the underlying broker.
#[derive(Clone)]
pub struct MemoryBus {
    topics: Arc<DashMap<String, Arc<Topic>>>,
    lock_duration: Duration,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            lock_duration: DEFAULT_LOCK,
        }
    }

    /// Shorten the delivery lock (tests exercise expiry redelivery).
    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::default()))
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn topic_sender(&self, topic: &str) -> Result<Arc<dyn TopicSender>, BusError> {
        Ok(Arc::new(MemorySender {
            topic: self.topic(topic),
            name: topic.to_string(),
        }))
    }

    async fn subscription_receiver(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Box<dyn SubscriptionReceiver>, BusError> {
        let topic = self.topic(topic);
        let sub = topic
            .subscriptions
            .entry(subscription.to_string())
            .or_insert_with(|| Arc::new(Subscription::default()))
            .clone();
        Ok(Box::new(MemoryReceiver {
            sub,
            lock_duration: self.lock_duration,
        }))
    }
}

#[derive(Default)]
struct Topic {
    subscriptions: DashMap<String, Arc<Subscription>>,
}

struct MemorySender {
    topic: Arc<Topic>,
    name: String,
}

#[async_trait]
impl TopicSender for MemorySender {
    async fn send(&self, message: BusMessage) -> Result<(), BusError> {
        // Topic semantics: each subscription gets its own copy. A topic
        // with no subscriptions drops the message, as on a real bus.
        trace!(topic = %self.name, message_id = %message.message_id, "publish");
        for sub in self.topic.subscriptions.iter() {
            sub.value().enqueue(message.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
struct Subscription {
    state: Mutex<SubState>,
    notify: Notify,
}

#[derive(Default)]
struct SubState {
    /// Per-session FIFO queues.
    queues: HashMap<String, VecDeque<Queued>>,
    /// Sessions with queued messages and no delivery in flight.
    ready: VecDeque<String>,
    /// Sessions with exactly one delivery in flight.
    locked: HashSet<String>,
    in_flight: HashMap<u64, InFlight>,
    next_token: u64,
}

struct Queued {
    message: BusMessage,
    /// Deliveries so far; incremented when the message is handed out.
    delivery_count: u32,
}

struct InFlight {
    message: BusMessage,
    session_id: String,
    delivery_count: u32,
    deadline: Instant,
}

impl Subscription {
    fn enqueue(&self, message: BusMessage) {
        let mut state = self.state.lock().unwrap();
        let session = message.session_id.clone();
        state
            .queues
            .entry(session.clone())
            .or_default()
            .push_back(Queued {
                message,
                delivery_count: 0,
            });
        if !state.locked.contains(&session) && !state.ready.contains(&session) {
            state.ready.push_back(session);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Requeue expired locks, then hand out the next message of an
    /// unlocked session, locking that session until settlement.
    fn try_next(&self, lock_duration: Duration) -> (Option<(u64, BusMessage, String, u32)>, Option<Instant>) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        let expired: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(t, _)| *t)
            .collect();
        for token in expired {
            if let Some(flight) = state.in_flight.remove(&token) {
                trace!(message_id = %flight.message.message_id, "delivery lock expired, requeueing");
                Self::requeue_front(&mut state, flight);
            }
        }

        while let Some(session) = state.ready.pop_front() {
            if state.locked.contains(&session) {
                continue;
            }
            let Some(queue) = state.queues.get_mut(&session) else {
                continue;
            };
            let Some(mut queued) = queue.pop_front() else {
                state.queues.remove(&session);
                continue;
            };
            queued.delivery_count += 1;
            let token = state.next_token;
            state.next_token += 1;
            let delivery_count = queued.delivery_count;
            let message = queued.message.clone();
            state.locked.insert(session.clone());
            state.in_flight.insert(
                token,
                InFlight {
                    message: queued.message,
                    session_id: session.clone(),
                    delivery_count,
                    deadline: now + lock_duration,
                },
            );
            return (Some((token, message, session, delivery_count)), None);
        }

        let next_expiry = state.in_flight.values().map(|f| f.deadline).min();
        (None, next_expiry)
    }

    fn requeue_front(state: &mut SubState, flight: InFlight) {
        let session = flight.session_id;
        state.queues.entry(session.clone()).or_default().push_front(Queued {
            message: flight.message,
            delivery_count: flight.delivery_count,
        });
        state.locked.remove(&session);
        if !state.ready.contains(&session) {
            state.ready.push_back(session);
        }
    }

    fn settle(&self, token: u64, abandon: bool) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        let Some(flight) = state.in_flight.remove(&token) else {
            // Lock already expired and the message was requeued; the
            // late settlement is a no-op, matching broker behavior.
            return Ok(());
        };
        if abandon {
            Self::requeue_front(&mut state, flight);
        } else {
            let session = flight.session_id;
            state.locked.remove(&session);
            let has_more = state.queues.get(&session).map(|q| !q.is_empty()).unwrap_or(false);
            if has_more && !state.ready.contains(&session) {
                state.ready.push_back(session);
            }
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryReceiver {
    sub: Arc<Subscription>,
    lock_duration: Duration,
}

#[async_trait]
impl SubscriptionReceiver for MemoryReceiver {
    async fn receive(&mut self, max_wait: Duration) -> Result<Option<Box<dyn Delivery>>, BusError> {
        let deadline = Instant::now() + max_wait;
        loop {
            // Register the waiter before checking state so a publish that
            // lands between the check and the await is not lost.
            let notified = self.sub.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (next, next_expiry) = self.sub.try_next(self.lock_duration);
            if let Some((token, message, session_id, delivery_count)) = next {
                return Ok(Some(Box::new(MemoryDelivery {
                    sub: self.sub.clone(),
                    token,
                    message,
                    session_id,
                    delivery_count,
                })));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let mut wait = deadline - now;
            if let Some(expiry) = next_expiry {
                wait = wait.min(expiry.saturating_duration_since(now).max(Duration::from_millis(1)));
            }
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }
}

struct MemoryDelivery {
    sub: Arc<Subscription>,
    token: u64,
    message: BusMessage,
    session_id: String,
    delivery_count: u32,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn message(&self) -> &BusMessage {
        &self.message
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    async fn complete(self: Box<Self>) -> Result<(), BusError> {
        trace!(message_id = %self.message.message_id, session_id = %self.session_id, "complete");
        self.sub.settle(self.token, false)
    }

    async fn abandon(self: Box<Self>) -> Result<(), BusError> {
        trace!(message_id = %self.message.message_id, session_id = %self.session_id, "abandon");
        self.sub.settle(self.token, true)
    }
}
