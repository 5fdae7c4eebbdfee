use std::{fmt::Display, future::Future};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{Delivery, QueueProducer, Result};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The body could not be decoded.
    DecodeFailed,
    /// The handler reported a permanent failure.
    HandleFailed,
    /// The message was delivered more often than allowed.
    PoisonMessage,
}

/// A message that will never be processed successfully, with the reason why.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub receive_count: u32,
    pub body: String,
    pub reason: DeadLetterReason,
    pub error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub dead_lettered_at: OffsetDateTime,
}

impl DeadLetter {
    pub fn new(delivery: &Delivery, reason: DeadLetterReason, error: impl Display) -> Self {
        Self {
            message_id: delivery.message_id().to_owned(),
            receive_count: delivery.receive_count(),
            body: String::from_utf8_lossy(delivery.borrow_payload().unwrap_or_default())
                .into_owned(),
            reason,
            error: error.to_string(),
            dead_lettered_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Append-only destination for dead letters.
///
/// A failed `send` leaves the original message unacknowledged, so it is
/// redelivered instead of lost.
pub trait DeadLetterSink: Send + Sync {
    fn send(&self, letter: &DeadLetter) -> impl Future<Output = Result<()>> + Send;
}

/// Writes dead letters to the log at error level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DeadLetterSink for LogSink {
    async fn send(&self, letter: &DeadLetter) -> Result<()> {
        tracing::error!(
            message_id = %letter.message_id,
            receive_count = letter.receive_count,
            reason = ?letter.reason,
            error = %letter.error,
            body = %letter.body,
            "dead letter"
        );
        Ok(())
    }
}

/// Forwards dead letters, JSON encoded, to a secondary queue.
pub struct QueueSink<P> {
    producer: P,
}

impl<P: QueueProducer> QueueSink<P> {
    pub fn new(producer: P) -> Self {
        Self { producer }
    }
}

impl<P: QueueProducer> DeadLetterSink for QueueSink<P> {
    async fn send(&self, letter: &DeadLetter) -> Result<()> {
        self.producer.send_serde_json(letter).await
    }
}
