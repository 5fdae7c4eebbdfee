//! # fanout-consumer
//!
//! A small, reliable harness for draining an at-least-once message queue, such as an SQS queue
//! subscribed to an SNS topic in a fan-out setup.
//!
//! The harness repeatedly polls a bounded batch of messages, decodes each body into a
//! [`DecodedOrder`], hands valid orders to a [`Handler`] and acknowledges every message whose
//! fate is settled. Messages whose handling failed transiently are left unacknowledged so the
//! queue redelivers them after the visibility timeout. Messages that can never succeed are
//! routed to an optional [`DeadLetterSink`].
//!
//! ## Cargo Features
//!
//! Each backend is enabled with its associated cargo feature. All backends are enabled by default.
//!
//! * `in_memory`: a process-local queue that models visibility timeouts and redelivery
//! * `sqs`: Amazon SQS
//!
//! ## Queues
//!
//! Each queue backend has a unique configuration type, taken when constructing the
//! [`QueueBuilder`]:
//!
//! ```no_run
//! # async {
//! use fanout_consumer::backends::sqs::{SqsBackend, SqsConfig};
//!
//! let cfg = SqsConfig {
//!     queue_dsn: "http://localhost:9324/queue/orders".to_owned(),
//!     override_endpoint: true,
//!     visibility_timeout: None,
//! };
//!
//! // Either both producer and consumer
//! let (p, mut c) = SqsBackend::builder(cfg.clone()).build_pair().await?;
//!
//! // Or one half
//! let p = SqsBackend::builder(cfg.clone()).build_producer().await?;
//! let mut c = SqsBackend::builder(cfg).build_consumer().await?;
//! # anyhow::Ok(())
//! # };
//! ```
//!
//! ## Draining a queue
//!
//! ```no_run
//! # async {
//! use fanout_consumer::{
//!     backends::sqs::{SqsBackend, SqsConfig},
//!     dead_letter::QueueSink,
//!     ConsumerConfig, ConsumerLoop, OrderLedger,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # let cfg: SqsConfig = todo!();
//! # let dlq_cfg: SqsConfig = todo!();
//! let consumer = SqsBackend::builder(cfg).build_consumer().await?;
//! let dlq = SqsBackend::builder(dlq_cfg).build_producer().await?;
//!
//! let shutdown = CancellationToken::new();
//! let worker = ConsumerLoop::new(
//!     consumer,
//!     OrderLedger::default(),
//!     ConsumerConfig::default(),
//!     shutdown.clone(),
//! )?
//! .with_dead_letter_sink(QueueSink::new(dlq));
//!
//! let totals = worker.run().await;
//! # anyhow::Ok(())
//! # };
//! ```
#![warn(unreachable_pub)]

use bytesize::ByteSize;
use thiserror::Error;

#[macro_use]
mod macros;

pub mod backends;
pub mod builder;
pub mod config;
pub mod dead_letter;
pub mod decode;
pub mod handler;
mod queue;
pub mod worker;

pub use self::{
    builder::QueueBuilder,
    config::ConsumerConfig,
    dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink},
    decode::{decode, DecodeError, DecodedOrder},
    handler::{HandleError, Handler, OrderLedger},
    queue::{
        AckError, Delivery, DeliveryMeta, DynConsumer, DynProducer, QueueBackend, QueueConsumer,
        QueueProducer,
    },
    worker::{BatchReport, ConsumerLoop, Outcome},
};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("only `build_pair` may be used with this type")]
    CannotCreateHalf,

    #[error("no data was received from the queue")]
    NoData,
    #[error("(de)serialization error")]
    Serde(#[from] serde_json::Error),

    #[error("acknowledgement failed: {0}")]
    Ack(#[from] AckError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("payload of {size} exceeds the queue limit of {limit}")]
    PayloadTooLarge { size: ByteSize, limit: ByteSize },

    #[error("{0}")]
    Generic(Box<dyn std::error::Error + Send + Sync>),
}

impl QueueError {
    pub fn generic<E: 'static + std::error::Error + Send + Sync>(e: E) -> Self {
        Self::Generic(Box::new(e))
    }
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
