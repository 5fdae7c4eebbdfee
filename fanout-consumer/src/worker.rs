//! The consumer loop.
//!
//! Each iteration polls one bounded batch and settles every message in it
//! independently:
//!
//! | situation                                   | outcome                         |
//! |---------------------------------------------|---------------------------------|
//! | handled                                     | acknowledged                    |
//! | transient failure, below the receive limit  | left for redelivery             |
//! | transient failure, at the receive limit     | dead-lettered (poison message)  |
//! | delivered more often than the receive limit | dead-lettered (poison message)  |
//! | permanent failure                           | dead-lettered                   |
//! | undecodable body                            | dead-lettered                   |
//!
//! Without a dead-letter sink, "dead-lettered" becomes "dropped": the message
//! is acknowledged and an error is logged.

use std::{fmt::Display, time::Duration};

use futures_util::{stream, StreamExt as _};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use crate::{
    dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink, LogSink},
    decode, ConsumerConfig, Delivery, Handler, QueueConsumer, Result,
};

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Where a single delivery ended up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Handled and removed from the queue.
    Acknowledged,
    /// Not acknowledged; the queue redelivers it after the visibility timeout.
    PendingRedelivery,
    /// Written to the dead-letter sink and removed from the queue.
    DeadLettered,
    /// Removed from the queue without being handled, as no sink is configured.
    Dropped,
}

/// Per-outcome message counts for one or more batches.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchReport {
    pub received: usize,
    pub acknowledged: usize,
    pub pending_redelivery: usize,
    pub dead_lettered: usize,
    pub dropped: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: Outcome) {
        self.received += 1;
        match outcome {
            Outcome::Acknowledged => self.acknowledged += 1,
            Outcome::PendingRedelivery => self.pending_redelivery += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
            Outcome::Dropped => self.dropped += 1,
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.received += other.received;
        self.acknowledged += other.acknowledged;
        self.pending_redelivery += other.pending_redelivery;
        self.dead_lettered += other.dead_lettered;
        self.dropped += other.dropped;
    }
}

/// Drains a queue until its cancellation token fires.
pub struct ConsumerLoop<C, H, S = LogSink> {
    consumer: C,
    handler: H,
    sink: Option<S>,
    config: ConsumerConfig,
    shutdown: CancellationToken,
}

impl<C: QueueConsumer, H: Handler> ConsumerLoop<C, H> {
    /// Fails if `config` does not pass [`ConsumerConfig::validate`].
    pub fn new(
        consumer: C,
        handler: H,
        config: ConsumerConfig,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            consumer,
            handler,
            sink: None,
            config,
            shutdown,
        })
    }
}

impl<C, H, S> ConsumerLoop<C, H, S>
where
    C: QueueConsumer,
    H: Handler,
    S: DeadLetterSink,
{
    pub fn with_dead_letter_sink<T: DeadLetterSink>(self, sink: T) -> ConsumerLoop<C, H, T> {
        ConsumerLoop {
            consumer: self.consumer,
            handler: self.handler,
            sink: Some(sink),
            config: self.config,
            shutdown: self.shutdown,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Waits up to the configured wait time for a batch.
    ///
    /// Returns an empty batch on timeout or as soon as shutdown is requested.
    pub async fn poll(&mut self) -> Result<Vec<Delivery>> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Ok(Vec::new()),
            batch = self.consumer.receive_all(self.config.max_batch, self.config.wait_time) => batch,
        }
    }

    /// Polls one batch and settles every message in it.
    pub async fn run_once(&mut self) -> Result<BatchReport> {
        let batch = self.poll().await?;
        Ok(settle_batch(batch, &self.handler, self.sink.as_ref(), &self.config).await)
    }

    /// Runs until the cancellation token fires, returning totals across all
    /// batches.
    ///
    /// Cancellation is observed between batches; a batch in flight is always
    /// finished, acknowledgements included. Poll errors are logged and retried.
    pub async fn run(mut self) -> BatchReport {
        tracing::info!(
            max_batch = self.config.max_batch,
            wait_time = ?self.config.wait_time,
            max_receive_count = self.config.max_receive_count,
            dead_letter_sink = self.sink.is_some(),
            "consumer loop started"
        );

        let mut totals = BatchReport::default();
        while !self.shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(report) => totals.merge(report),
                Err(e) => {
                    tracing::error!(error = %e, "polling the queue failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(
            received = totals.received,
            acknowledged = totals.acknowledged,
            dead_lettered = totals.dead_lettered,
            dropped = totals.dropped,
            "consumer loop stopped"
        );
        totals
    }
}

async fn settle_batch<H: Handler, S: DeadLetterSink>(
    batch: Vec<Delivery>,
    handler: &H,
    sink: Option<&S>,
    config: &ConsumerConfig,
) -> BatchReport {
    let mut report = BatchReport::default();
    if batch.is_empty() {
        return report;
    }

    // Started in batch order; each settles on its own.
    let outcomes: Vec<Outcome> = stream::iter(batch)
        .map(|delivery| {
            let span = tracing::info_span!(
                "message",
                message_id = %delivery.message_id(),
                receive_count = delivery.receive_count(),
            );
            settle(delivery, handler, sink, config).instrument(span)
        })
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    for outcome in outcomes {
        report.record(outcome);
    }
    report
}

async fn settle<H: Handler, S: DeadLetterSink>(
    delivery: Delivery,
    handler: &H,
    sink: Option<&S>,
    config: &ConsumerConfig,
) -> Outcome {
    let receive_count = delivery.receive_count();
    if receive_count > config.max_receive_count {
        let error = format!(
            "delivered {receive_count} times, limit is {}",
            config.max_receive_count
        );
        return give_up(delivery, sink, DeadLetterReason::PoisonMessage, error).await;
    }

    let order = match decode(delivery.borrow_payload().unwrap_or_default()) {
        Ok(order) => order,
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "undecodable message");
            return give_up(delivery, sink, DeadLetterReason::DecodeFailed, e).await;
        }
    };

    let started = Instant::now();
    let handled = handler.handle(&order).await;
    let elapsed = started.elapsed();
    if elapsed > config.visibility_timeout {
        tracing::warn!(
            ?elapsed,
            visibility_timeout = ?config.visibility_timeout,
            "handling outlived the visibility timeout; expect a duplicate delivery"
        );
    }

    match handled {
        Ok(()) => acknowledge(delivery, Outcome::Acknowledged).await,
        Err(e) if e.is_transient() && receive_count < config.max_receive_count => {
            tracing::warn!(error = %e, "transient failure; leaving message for redelivery");
            Outcome::PendingRedelivery
        }
        Err(e) if e.is_transient() => {
            give_up(delivery, sink, DeadLetterReason::PoisonMessage, e).await
        }
        Err(e) => give_up(delivery, sink, DeadLetterReason::HandleFailed, e).await,
    }
}

/// Dead-letters (or drops) a message that will never succeed, then removes it.
async fn give_up<S: DeadLetterSink>(
    delivery: Delivery,
    sink: Option<&S>,
    reason: DeadLetterReason,
    error: impl Display + Send,
) -> Outcome {
    let Some(sink) = sink else {
        tracing::error!(?reason, error = %error, "dropping message");
        return acknowledge(delivery, Outcome::Dropped).await;
    };

    let letter = DeadLetter::new(&delivery, reason, &error);
    if let Err(e) = sink.send(&letter).await {
        tracing::error!(
            ?reason,
            error = %e,
            "dead-letter sink rejected message; leaving it for redelivery"
        );
        return Outcome::PendingRedelivery;
    }

    tracing::error!(?reason, error = %error, "message dead-lettered");
    acknowledge(delivery, Outcome::DeadLettered).await
}

async fn acknowledge(delivery: Delivery, settled: Outcome) -> Outcome {
    match delivery.ack().await {
        Ok(()) => {
            tracing::debug!("acknowledged");
            settled
        }
        Err((e, _)) => {
            tracing::warn!(error = %e, "acknowledgement failed; message will be redelivered");
            Outcome::PendingRedelivery
        }
    }
}
