use std::{sync::Arc, time::Duration};

use aws_sdk_sqs::{
    operation::{
        change_message_visibility::ChangeMessageVisibilityError,
        delete_message::DeleteMessageError,
    },
    types::{Message, MessageSystemAttributeName},
    Client,
};
use bytesize::ByteSize;
use serde::Serialize;

use crate::{
    builder::{QueueBuilder, Static},
    queue::{AckError, Acker, Delivery, DeliveryMeta},
    QueueBackend, QueueError, Result,
};

/// Largest message body SQS accepts.
const MAX_BODY_SIZE: ByteSize = ByteSize::kib(256);
/// SQS caps a single receive at this many messages.
const MAX_RECEIVE_BATCH: usize = 10;
/// SQS caps long polling at this many seconds.
const MAX_WAIT_TIME_SECONDS: u64 = 20;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SqsConfig {
    pub queue_dsn: String,
    pub override_endpoint: bool,
    /// Visibility timeout requested on every receive. When unset, the
    /// queue's own default applies.
    pub visibility_timeout: Option<Duration>,
}

pub struct SqsBackend;

impl SqsBackend {
    /// Creates a new Amazon SQS queue builder with the given configuration.
    pub fn builder(config: SqsConfig) -> QueueBuilder<Self, Static> {
        QueueBuilder::new(config)
    }
}

impl QueueBackend for SqsBackend {
    type Producer = SqsProducer;
    type Consumer = SqsConsumer;

    type Config = SqsConfig;

    async fn new_pair(cfg: SqsConfig) -> Result<(SqsProducer, SqsConsumer)> {
        let client = make_client(&cfg).await;
        let queue_dsn: Arc<str> = cfg.queue_dsn.into();

        let producer = SqsProducer {
            client: client.clone(),
            queue_dsn: queue_dsn.clone(),
        };
        let consumer = SqsConsumer {
            client,
            queue_dsn,
            visibility_timeout: cfg.visibility_timeout,
        };

        Ok((producer, consumer))
    }

    async fn producing_half(cfg: SqsConfig) -> Result<SqsProducer> {
        let client = make_client(&cfg).await;

        Ok(SqsProducer {
            client,
            queue_dsn: cfg.queue_dsn.into(),
        })
    }

    async fn consuming_half(cfg: SqsConfig) -> Result<SqsConsumer> {
        let client = make_client(&cfg).await;

        Ok(SqsConsumer {
            client,
            queue_dsn: cfg.queue_dsn.into(),
            visibility_timeout: cfg.visibility_timeout,
        })
    }
}

async fn make_client(cfg: &SqsConfig) -> Client {
    let aws_cfg = if cfg.override_endpoint {
        aws_config::from_env()
            .endpoint_url(&cfg.queue_dsn)
            .load()
            .await
    } else {
        aws_config::load_from_env().await
    };
    Client::new(&aws_cfg)
}

struct SqsAcker {
    ack_client: Client,
    queue_dsn: Arc<str>,
    receipt_handle: String,

    has_been_acked_or_nacked: bool,
}

impl Acker for SqsAcker {
    async fn ack(&mut self) -> Result<(), AckError> {
        if self.has_been_acked_or_nacked {
            return Err(AckError::AlreadyAcknowledged);
        }

        self.ack_client
            .delete_message()
            .queue_url(&*self.queue_dsn)
            .receipt_handle(&self.receipt_handle)
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                DeleteMessageError::ReceiptHandleIsInvalid(_) => AckError::HandleExpired,
                other => AckError::transport(other),
            })?;

        self.has_been_acked_or_nacked = true;
        Ok(())
    }

    async fn nack(&mut self) -> Result<(), AckError> {
        if self.has_been_acked_or_nacked {
            return Err(AckError::AlreadyAcknowledged);
        }

        self.ack_client
            .change_message_visibility()
            .queue_url(&*self.queue_dsn)
            .receipt_handle(&self.receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                ChangeMessageVisibilityError::MessageNotInflight(_)
                | ChangeMessageVisibilityError::ReceiptHandleIsInvalid(_) => {
                    AckError::HandleExpired
                }
                other => AckError::transport(other),
            })?;

        self.has_been_acked_or_nacked = true;
        Ok(())
    }
}

/// Whole seconds of long polling for `wait`, rounded up so a sub-second wait
/// still long polls, and capped at the SQS maximum.
fn wait_time_seconds(wait: Duration) -> i32 {
    let secs = wait
        .as_secs()
        .saturating_add(u64::from(wait.subsec_nanos() > 0));
    // Capped at 20, so always fits.
    secs.min(MAX_WAIT_TIME_SECONDS) as i32
}

pub struct SqsProducer {
    client: Client,
    queue_dsn: Arc<str>,
}

impl SqsProducer {
    pub async fn send_raw(&self, payload: &str) -> Result<()> {
        let size = ByteSize::b(payload.len() as u64);
        if size > MAX_BODY_SIZE {
            return Err(QueueError::PayloadTooLarge {
                size,
                limit: MAX_BODY_SIZE,
            });
        }

        self.client
            .send_message()
            .queue_url(&*self.queue_dsn)
            .message_body(payload)
            .send()
            .await
            .map_err(QueueError::generic)?;

        Ok(())
    }

    /// SQS bodies are text, so `payload` must be valid UTF-8.
    pub async fn send_bytes(&self, payload: &[u8]) -> Result<()> {
        let payload = std::str::from_utf8(payload).map_err(QueueError::generic)?;
        self.send_raw(payload).await
    }

    pub async fn send_serde_json<P: Serialize + Sync>(&self, payload: &P) -> Result<()> {
        let payload = serde_json::to_string(payload)?;
        self.send_raw(&payload).await
    }
}

impl_queue_producer!(SqsProducer);

pub struct SqsConsumer {
    client: Client,
    queue_dsn: Arc<str>,
    visibility_timeout: Option<Duration>,
}

impl SqsConsumer {
    fn wrap_message(&self, message: &Message) -> Option<Delivery> {
        // Without a receipt handle the message can never be deleted.
        let receipt_handle = message.receipt_handle()?.to_owned();
        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        let meta = DeliveryMeta {
            message_id: message.message_id().unwrap_or_default().to_owned(),
            receipt_handle: receipt_handle.clone(),
            receive_count,
        };
        let acker = SqsAcker {
            ack_client: self.client.clone(),
            queue_dsn: self.queue_dsn.clone(),
            receipt_handle,
            has_been_acked_or_nacked: false,
        };
        let payload = message.body().unwrap_or_default().as_bytes().to_owned();

        Some(Delivery::new(payload, meta, acker))
    }

    async fn receive_batch(&self, max_messages: usize, wait: Duration) -> Result<Vec<Delivery>> {
        let max_messages = max_messages.min(MAX_RECEIVE_BATCH);
        let visibility_timeout = self
            .visibility_timeout
            .map(|t| t.as_secs().try_into().map_err(QueueError::generic))
            .transpose()?;

        let out = self
            .client
            .receive_message()
            .queue_url(&*self.queue_dsn)
            .set_max_number_of_messages(Some(
                max_messages.try_into().map_err(QueueError::generic)?,
            ))
            .set_wait_time_seconds(Some(wait_time_seconds(wait)))
            .set_visibility_timeout(visibility_timeout)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(QueueError::generic)?;

        let deliveries = out
            .messages
            .unwrap_or_default()
            .iter()
            .filter_map(|message| {
                let delivery = self.wrap_message(message);
                if delivery.is_none() {
                    tracing::warn!(
                        message_id = message.message_id().unwrap_or_default(),
                        "SQS message without a receipt handle; skipping"
                    );
                }
                delivery
            })
            .collect();
        Ok(deliveries)
    }

    pub async fn receive(&mut self) -> Result<Delivery> {
        loop {
            let mut xs = self
                .receive_batch(1, Duration::from_secs(MAX_WAIT_TIME_SECONDS))
                .await?;
            if let Some(delivery) = xs.pop() {
                return Ok(delivery);
            }
        }
    }

    /// Long polls for up to `deadline`, capped at 20 seconds, and at most 10
    /// messages.
    pub async fn receive_all(
        &mut self,
        max_messages: usize,
        deadline: Duration,
    ) -> Result<Vec<Delivery>> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }
        self.receive_batch(max_messages, deadline).await
    }
}

impl_queue_consumer!(SqsConsumer);
