use std::{fmt, future::Future};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::Result;

mod acker;
mod consumer;
mod producer;

use self::acker::DynAcker;
pub(crate) use self::acker::Acker;
pub use self::{
    consumer::{DynConsumer, QueueConsumer},
    producer::{DynProducer, QueueProducer},
};

/// A queue implementation, named by an empty marker type.
///
/// Produces both halves of a queue, or either one alone, from a config.
pub trait QueueBackend {
    type Producer: QueueProducer + 'static;
    type Consumer: QueueConsumer + 'static;

    type Config;

    fn new_pair(
        config: Self::Config,
    ) -> impl Future<Output = Result<(Self::Producer, Self::Consumer)>> + Send;

    fn producing_half(config: Self::Config) -> impl Future<Output = Result<Self::Producer>> + Send;

    fn consuming_half(config: Self::Config) -> impl Future<Output = Result<Self::Consumer>> + Send;
}

/// Reasons an acknowledgement (or negative acknowledgement) can fail.
///
/// None of these are fatal: a message whose acknowledgement failed simply
/// becomes visible again once its visibility timeout elapses.
#[derive(Debug, Error)]
pub enum AckError {
    #[error("the receipt handle expired before the message was acknowledged")]
    HandleExpired,
    #[error("no message with this receipt handle exists in the queue")]
    NotFound,
    #[error("a single delivery may only be ACKed or NACKed once")]
    AlreadyAcknowledged,
    #[error("{0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

impl AckError {
    pub fn transport<E: 'static + std::error::Error + Send + Sync>(e: E) -> Self {
        Self::Transport(Box::new(e))
    }
}

/// Broker-side facts about a single delivery attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeliveryMeta {
    /// Identifies the logical message; stable across redeliveries.
    pub message_id: String,
    /// Identifies this delivery attempt; a redelivery carries a new handle.
    pub receipt_handle: String,
    /// How many times the logical message has been delivered, starting at 1.
    pub receive_count: u32,
}

/// The output of queue backends
pub struct Delivery {
    payload: Option<Vec<u8>>,
    meta: DeliveryMeta,
    acker: DynAcker,
}

impl Delivery {
    pub(crate) fn new(payload: Vec<u8>, meta: DeliveryMeta, acker: impl Acker + 'static) -> Self {
        Self {
            payload: Some(payload),
            meta,
            acker: DynAcker::new(acker),
        }
    }

    /// Acknowledges the receipt and successful processing of this [`Delivery`],
    /// removing the message from the queue.
    ///
    /// On failure, `self` is returned alongside the error to allow retrying.
    pub async fn ack(mut self) -> Result<(), (AckError, Self)> {
        self.acker.ack().await.map_err(|e| (e, self))
    }

    /// Explicitly does not acknowledge the successful processing of this
    /// [`Delivery`], making the message visible to consumers again right away
    /// instead of after the visibility timeout.
    ///
    /// On failure, `self` is returned alongside the error to allow retrying.
    pub async fn nack(mut self) -> Result<(), (AckError, Self)> {
        self.acker.nack().await.map_err(|e| (e, self))
    }

    pub fn meta(&self) -> &DeliveryMeta {
        &self.meta
    }

    pub fn message_id(&self) -> &str {
        &self.meta.message_id
    }

    pub fn receipt_handle(&self) -> &str {
        &self.meta.receipt_handle
    }

    pub fn receive_count(&self) -> u32 {
        self.meta.receive_count
    }

    /// This method will take the contained bytes out of the delivery, doing no
    /// further processing.
    ///
    /// Once called, subsequent calls to any payload methods will fail.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        self.payload.take()
    }

    pub fn borrow_payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn payload_serde_json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let Some(bytes) = self.payload.as_ref() else {
            return Ok(None);
        };
        serde_json::from_slice(bytes).map_err(Into::into)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.meta.message_id)
            .field("receive_count", &self.meta.receive_count)
            .finish()
    }
}
