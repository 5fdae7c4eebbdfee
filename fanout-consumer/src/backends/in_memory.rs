use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use svix_ksuid::{KsuidLike as _, KsuidMs};
use tokio::{sync::Notify, time::Instant};

use crate::{
    builder::{QueueBuilder, Static},
    queue::{AckError, Acker, Delivery, DeliveryMeta},
    QueueBackend, QueueError, Result,
};

/// Settings for the in-memory queue.
///
/// The defaults match a freshly created SQS standard queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InMemoryConfig {
    /// How long a received message stays hidden from other receives.
    pub visibility_timeout: Duration,
    /// How long a message may stay in the queue before it is discarded.
    pub retention_period: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            retention_period: Duration::from_secs(4 * 24 * 60 * 60),
        }
    }
}

pub struct InMemoryBackend;

impl InMemoryBackend {
    /// Creates a new in-memory queue builder.
    pub fn builder(config: InMemoryConfig) -> QueueBuilder<Self, Static> {
        QueueBuilder::new(config)
    }
}

impl QueueBackend for InMemoryBackend {
    type Producer = InMemoryProducer;
    type Consumer = InMemoryConsumer;

    type Config = InMemoryConfig;

    async fn new_pair(config: InMemoryConfig) -> Result<(InMemoryProducer, InMemoryConsumer)> {
        let shared = Arc::new(Shared::new(config));

        Ok((
            InMemoryProducer {
                shared: shared.clone(),
            },
            InMemoryConsumer { shared },
        ))
    }

    async fn producing_half(_config: InMemoryConfig) -> Result<InMemoryProducer> {
        Err(QueueError::CannotCreateHalf)
    }

    async fn consuming_half(_config: InMemoryConfig) -> Result<InMemoryConsumer> {
        Err(QueueError::CannotCreateHalf)
    }
}

fn new_id() -> String {
    KsuidMs::new(None, None).to_string()
}

struct StoredMessage {
    message_id: String,
    body: Vec<u8>,
    sent_at: Instant,
    receive_count: u32,
    in_flight: Option<InFlight>,
}

struct InFlight {
    receipt_handle: String,
    /// `None` when the visibility timeout reaches past what `Instant` can
    /// represent; the message then stays hidden until settled.
    visible_at: Option<Instant>,
}

impl InFlight {
    fn is_hidden(&self, now: Instant) -> bool {
        self.visible_at.map_or(true, |at| at > now)
    }
}

enum Settlement {
    Ack,
    Nack,
}

struct Shared {
    config: InMemoryConfig,
    queue: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
}

impl Shared {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<StoredMessage>> {
        // No method panics while holding the lock, so poisoning leaves the queue intact.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, message: &StoredMessage, now: Instant) -> bool {
        now.duration_since(message.sent_at) >= self.config.retention_period
    }

    fn push(&self, body: Vec<u8>) {
        self.lock().push_back(StoredMessage {
            message_id: new_id(),
            body,
            sent_at: Instant::now(),
            receive_count: 0,
            in_flight: None,
        });
        self.notify.notify_waiters();
    }

    fn depth(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|m| !self.is_expired(m, now))
            .count()
    }

    /// Hides up to `max` visible messages behind fresh receipt handles.
    ///
    /// Also returns the earliest instant at which a message that is currently
    /// in flight becomes visible again.
    fn claim(&self, max: usize) -> (Vec<(Vec<u8>, DeliveryMeta)>, Option<Instant>) {
        let now = Instant::now();
        let mut queue = self.lock();
        queue.retain(|m| !self.is_expired(m, now));

        let mut claimed = Vec::new();
        let mut next_visible: Option<Instant> = None;
        for message in queue.iter_mut() {
            if let Some(in_flight) = &message.in_flight {
                if in_flight.is_hidden(now) {
                    if let Some(at) = in_flight.visible_at {
                        next_visible = Some(next_visible.map_or(at, |t| t.min(at)));
                    }
                    continue;
                }
            }
            if claimed.len() >= max {
                break;
            }

            message.receive_count += 1;
            let receipt_handle = new_id();
            message.in_flight = Some(InFlight {
                receipt_handle: receipt_handle.clone(),
                visible_at: now.checked_add(self.config.visibility_timeout),
            });
            claimed.push((
                message.body.clone(),
                DeliveryMeta {
                    message_id: message.message_id.clone(),
                    receipt_handle,
                    receive_count: message.receive_count,
                },
            ));
        }

        (claimed, next_visible)
    }

    fn settle(
        &self,
        message_id: &str,
        receipt_handle: &str,
        settlement: Settlement,
    ) -> Result<(), AckError> {
        let now = Instant::now();
        let mut queue = self.lock();
        let idx = queue
            .iter()
            .position(|m| m.message_id == message_id && !self.is_expired(m, now))
            .ok_or(AckError::NotFound)?;

        match &queue[idx].in_flight {
            Some(f) if f.receipt_handle == receipt_handle && f.is_hidden(now) => {}
            _ => return Err(AckError::HandleExpired),
        }

        match settlement {
            Settlement::Ack => {
                queue.remove(idx);
            }
            Settlement::Nack => {
                queue[idx].in_flight = None;
                drop(queue);
                self.notify.notify_waiters();
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryProducer {
    shared: Arc<Shared>,
}

impl InMemoryProducer {
    pub async fn send_bytes(&self, payload: &[u8]) -> Result<()> {
        self.shared.push(payload.to_owned());
        Ok(())
    }

    pub async fn send_serde_json<P: Serialize + Sync>(&self, payload: &P) -> Result<()> {
        let payload = serde_json::to_vec(payload)?;
        self.send_bytes(&payload).await
    }

    /// Number of messages not yet deleted, whether visible or in flight.
    pub fn queue_depth(&self) -> usize {
        self.shared.depth()
    }
}

impl_queue_producer!(InMemoryProducer);

#[derive(Clone)]
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
}

impl InMemoryConsumer {
    fn wrap_payload(&self, payload: Vec<u8>, meta: DeliveryMeta) -> Delivery {
        let acker = InMemoryAcker {
            shared: self.shared.clone(),
            message_id: meta.message_id.clone(),
            receipt_handle: meta.receipt_handle.clone(),
            already_acked_or_nacked: false,
        };
        Delivery::new(payload, meta, acker)
    }

    /// Claims up to `max_messages`, waiting until `deadline` or forever if there is none.
    async fn wait_for(&self, max_messages: usize, deadline: Option<Instant>) -> Vec<Delivery> {
        loop {
            // Registered before claiming so a send racing the claim still wakes us.
            let notified = self.shared.notify.notified();

            let (claimed, next_visible) = self.shared.claim(max_messages);
            if !claimed.is_empty() {
                return claimed
                    .into_iter()
                    .map(|(payload, meta)| self.wrap_payload(payload, meta))
                    .collect();
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Vec::new();
            }

            let wake_at = match (deadline, next_visible) {
                (Some(d), Some(v)) => Some(d.min(v)),
                (d, v) => d.or(v),
            };
            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    pub async fn receive(&mut self) -> Result<Delivery> {
        self.wait_for(1, None)
            .await
            .into_iter()
            .next()
            .ok_or(QueueError::NoData)
    }

    pub async fn receive_all(
        &mut self,
        max_messages: usize,
        deadline: Duration,
    ) -> Result<Vec<Delivery>> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .wait_for(max_messages, Instant::now().checked_add(deadline))
            .await)
    }

    /// Number of messages not yet deleted, whether visible or in flight.
    pub fn queue_depth(&self) -> usize {
        self.shared.depth()
    }
}

impl_queue_consumer!(InMemoryConsumer);

struct InMemoryAcker {
    shared: Arc<Shared>,
    message_id: String,
    receipt_handle: String,
    already_acked_or_nacked: bool,
}

impl InMemoryAcker {
    fn settle(&mut self, settlement: Settlement) -> Result<(), AckError> {
        if self.already_acked_or_nacked {
            return Err(AckError::AlreadyAcknowledged);
        }
        self.shared
            .settle(&self.message_id, &self.receipt_handle, settlement)?;
        self.already_acked_or_nacked = true;
        Ok(())
    }
}

impl Acker for InMemoryAcker {
    async fn ack(&mut self) -> Result<(), AckError> {
        self.settle(Settlement::Ack)
    }

    async fn nack(&mut self) -> Result<(), AckError> {
        self.settle(Settlement::Nack)
    }
}
